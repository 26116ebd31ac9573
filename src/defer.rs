/// Runs the wrapped closure once when dropped, including on early return or
/// when the enclosing future is dropped mid-await.
pub(crate) struct Deferred<F: FnOnce()>(pub(crate) Option<F>);

impl<F: FnOnce()> Drop for Deferred<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

macro_rules! defer {
    ($func:block) => {
        let _deferred = $crate::defer::Deferred(Some(|| $func));
    };
    ($func:expr) => {
        let _deferred = $crate::defer::Deferred(Some($func));
    };
}
