/// Downstream refresh run after each successfully processed trade.
///
/// `trigger` must return immediately; the pass runs in the background and
/// its outcome is only logged.
pub trait Reconciler: Send + Sync {
    fn trigger(&self, trade_id: &str);
}
