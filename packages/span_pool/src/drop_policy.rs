/// Determines what happens when a pool is disposed or dropped while blocks are still live.
///
/// By default, the pool releases its buffer regardless of live blocks.
///
/// # Examples
///
/// ```
/// use span_pool::{DropPolicy, SpanPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = SpanPool::builder()
///     .buffer_size(1024)
///     .drop_policy(DropPolicy::MustNotDropBlocks)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped with live blocks. This is the default.
    #[default]
    MayDropBlocks,

    /// The pool will panic if it still has live blocks when it is dropped.
    ///
    /// This is valuable when the owner of the pool must prove that every block was returned
    /// before the memory goes away, for example because block contents are referenced from
    /// outside the pool by offset.
    MustNotDropBlocks,
}
