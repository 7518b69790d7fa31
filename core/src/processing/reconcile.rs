use log::debug;

/// Trims the trailing excess of the longer slice so both have equal length.
///
/// Samples are only ever dropped from the end; the leading samples of both
/// inputs are kept.
pub fn reconcile<'a, A, B>(a: &'a [A], b: &'a [B]) -> (&'a [A], &'a [B]) {
    let len = a.len().min(b.len());
    if a.len() != b.len() {
        debug!(
            "reconciling sequences of length {} and {} to {}",
            a.len(),
            b.len(),
            len
        );
    }
    (&a[..len], &b[..len])
}
