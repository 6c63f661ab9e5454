//! Progress-callback trait for parse events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParsingConfigBuilder::progress_callback`] to observe the
//! selector and the tiling strategy as they work: which strategy is being
//! tried, how many tiles the detail pass planned, and each tile as it
//! resolves.
//!
//! # Example
//!
//! ```rust
//! use takeoff_parser::{ParseProgressCallback, ParsingConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct TileCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl ParseProgressCallback for TileCounter {
//!     fn on_tile_complete(&self, _page: usize, _tile: usize, _total: usize, _ok: bool) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ParsingConfig::builder()
//!     .progress_callback(Arc::new(TileCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::analyze::DocumentMetrics;
use std::sync::Arc;

/// Called by the selector and strategies while a document is parsed.
///
/// Tile events arrive concurrently (up to `max_concurrent_tiles` at once),
/// so implementations must synchronise any shared state. Every method has a
/// no-op default.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once the document has been profiled.
    fn on_analysis_complete(&self, metrics: &DocumentMetrics) {
        let _ = metrics;
    }

    /// Called before strategy `index` (1-based) of `chain_len` is attempted.
    fn on_strategy_start(&self, name: &str, index: usize, chain_len: usize) {
        let _ = (name, index, chain_len);
    }

    /// Called when a strategy fails and the chain moves on.
    fn on_strategy_failed(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called once the detail pass knows how many tiles it will submit.
    fn on_tiles_planned(&self, total_tiles: usize) {
        let _ = total_tiles;
    }

    /// Called as each tile resolves; `ok` is false when the tile was omitted.
    fn on_tile_complete(&self, page: usize, tile_number: usize, total_tiles: usize, ok: bool) {
        let _ = (page, tile_number, total_tiles, ok);
    }

    /// Called once when the fallback chain finishes.
    fn on_parse_complete(&self, success: bool, strategy: Option<&str>) {
        let _ = (success, strategy);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Alias matching the type stored in [`crate::config::ParsingConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        strategies: AtomicUsize,
        failures: AtomicUsize,
        tiles_ok: AtomicUsize,
        tiles_failed: AtomicUsize,
    }

    impl ParseProgressCallback for Tracking {
        fn on_strategy_start(&self, _name: &str, _index: usize, _len: usize) {
            self.strategies.fetch_add(1, Ordering::SeqCst);
        }

        fn on_strategy_failed(&self, _name: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_tile_complete(&self, _page: usize, _tile: usize, _total: usize, ok: bool) {
            if ok {
                self.tiles_ok.fetch_add(1, Ordering::SeqCst);
            } else {
                self.tiles_failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_accepts_every_event() {
        let cb = NoopProgressCallback;
        cb.on_strategy_start("Claude Tiling", 1, 2);
        cb.on_tiles_planned(12);
        cb.on_tile_complete(1, 0, 12, true);
        cb.on_strategy_failed("Claude Tiling", "boom");
        cb.on_parse_complete(false, None);
    }

    #[test]
    fn tracking_callback_counts_events() {
        let cb = Tracking::default();
        cb.on_strategy_start("OpenAI Native", 1, 2);
        cb.on_strategy_failed("OpenAI Native", "bad json");
        cb.on_strategy_start("Claude Tiling", 2, 2);
        cb.on_tile_complete(1, 0, 3, true);
        cb.on_tile_complete(1, 1, 3, false);
        cb.on_tile_complete(1, 2, 3, true);

        assert_eq!(cb.strategies.load(Ordering::SeqCst), 2);
        assert_eq!(cb.failures.load(Ordering::SeqCst), 1);
        assert_eq!(cb.tiles_ok.load(Ordering::SeqCst), 2);
        assert_eq!(cb.tiles_failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_tiles_planned(4);
    }
}
