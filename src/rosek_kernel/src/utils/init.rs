/// Types having a constant default value. This is essentially a
/// constant version of `Default`, usable to build `static` items.
pub trait Init {
    /// The constant default value.
    const INIT: Self;
}

impl Init for bool {
    const INIT: Self = false;
}

macro_rules! impl_init_int {
    ($($ty:ty),*) => {
        $(
            impl Init for $ty {
                const INIT: Self = 0;
            }
        )*
    };
}

impl_init_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl<T: Init, const N: usize> Init for [T; N] {
    // The inline const makes the repeat operand usable for non-`Copy` types.
    const INIT: Self = [const { T::INIT }; N];
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}
