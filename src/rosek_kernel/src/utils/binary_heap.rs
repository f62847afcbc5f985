//! Binary heap with a contextful comparator.
//!
//! Elements are identifiers whose sort keys live outside the container, so
//! every operation takes a [`BinaryHeapCtx`] supplying the ordering.
use core::ops;

use arrayvec::ArrayVec;

/// Context type for [`BinaryHeap`]'s operations.
pub trait BinaryHeapCtx<Element> {
    /// Return `true` iff `x < y`.
    fn lt(&mut self, x: &Element, y: &Element) -> bool;
}

impl<T: Ord> BinaryHeapCtx<T> for () {
    fn lt(&mut self, x: &T, y: &T) -> bool {
        *x < *y
    }
}

/// Storage abstraction over a growable, bounded vector.
pub trait VecLike: ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut {
    type Element;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
    fn pop(&mut self) -> Option<Self::Element>;
    fn push(&mut self, x: Self::Element);
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
}

#[cfg(test)]
impl<T> VecLike for std::vec::Vec<T> {
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
}

/// Min-heap over [`VecLike`] storage.
pub trait BinaryHeap: VecLike {
    /// Remove the least item from the heap and return it.
    fn heap_pop(&mut self, ctx: impl BinaryHeapCtx<Self::Element>) -> Option<Self::Element>;

    /// Remove the item at the specified position and return it.
    fn heap_remove(
        &mut self,
        i: usize,
        ctx: impl BinaryHeapCtx<Self::Element>,
    ) -> Option<Self::Element>;

    /// Push an item onto the heap and return its position.
    fn heap_push(&mut self, item: Self::Element, ctx: impl BinaryHeapCtx<Self::Element>) -> usize;
}

impl<T: VecLike> BinaryHeap for T {
    fn heap_pop(&mut self, ctx: impl BinaryHeapCtx<Self::Element>) -> Option<Self::Element> {
        self.heap_remove(0, ctx)
    }

    fn heap_remove(
        &mut self,
        i: usize,
        mut ctx: impl BinaryHeapCtx<Self::Element>,
    ) -> Option<Self::Element> {
        if i >= self.len() {
            return None;
        }

        let last = self.len() - 1;
        (**self).swap(i, last);
        let item = self.pop();

        if i < self.len() {
            let slice = &mut **self;
            if i > 0 && ctx.lt(&slice[i], &slice[(i - 1) / 2]) {
                sift_up(slice, i, &mut ctx);
            } else {
                sift_down(slice, i, &mut ctx);
            }
        }
        item
    }

    fn heap_push(&mut self, item: Self::Element, mut ctx: impl BinaryHeapCtx<Self::Element>) -> usize {
        let i = self.len();
        self.push(item);
        sift_up(&mut **self, i, &mut ctx)
    }
}

/// Move the element at `pos` toward the root until its parent is not larger.
/// Returns the final position.
fn sift_up<Element, Ctx: BinaryHeapCtx<Element>>(
    this: &mut [Element],
    mut pos: usize,
    ctx: &mut Ctx,
) -> usize {
    while pos > 0 {
        let parent = (pos - 1) / 2;
        if !ctx.lt(&this[pos], &this[parent]) {
            break;
        }
        this.swap(pos, parent);
        pos = parent;
    }
    pos
}

/// Move the element at `pos` down the heap while either child is smaller.
fn sift_down<Element, Ctx: BinaryHeapCtx<Element>>(
    this: &mut [Element],
    mut pos: usize,
    ctx: &mut Ctx,
) {
    let end = this.len();
    loop {
        let mut child = 2 * pos + 1;
        if child >= end {
            break;
        }
        // compare with the lesser of the two children
        if child + 1 < end && ctx.lt(&this[child + 1], &this[child]) {
            child += 1;
        }
        if !ctx.lt(&this[child], &this[pos]) {
            break;
        }
        this.swap(pos, child);
        pos = child;
    }
}
