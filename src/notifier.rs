//! Transient status banners and the selection flash.
//!
//! A banner is mounted immediately, faded after `dismiss_ms`, and removed
//! `fade_ms` later. Timers run on spawned tasks so [`Notifier::show`]
//! returns at once and never blocks the page.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::NotifierConfig;
use crate::dom::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub id: u64,
    pub message: String,
    pub kind: NoticeKind,
}

/// Anything that can show a one-off status message.
pub trait Notifier: Send + Sync {
    fn show(&self, message: &str, kind: NoticeKind);

    /// Briefly mark the selection on the page. No-op where there is
    /// nothing to draw on.
    fn flash(&self, _selection: &Selection) {}
}

/// Where banners are drawn. Implemented by the host page.
pub trait BannerSurface: Send + Sync {
    fn mount(&self, banner: &Banner);
    fn fade(&self, id: u64);
    fn remove(&self, id: u64);
    /// Visually wrap the selection. May fail (e.g. a range crossing
    /// element boundaries cannot be wrapped).
    fn wrap_selection(&self, selection: &Selection) -> anyhow::Result<()>;
    fn unwrap_selection(&self);
}

/// Self-dismissing banner notifier.
pub struct BannerNotifier {
    surface: Arc<dyn BannerSurface>,
    timing: NotifierConfig,
    next_id: AtomicU64,
}

impl BannerNotifier {
    pub fn new(surface: Arc<dyn BannerSurface>, timing: NotifierConfig) -> Self {
        Self {
            surface,
            timing,
            next_id: AtomicU64::new(1),
        }
    }

}

impl Notifier for BannerNotifier {
    fn show(&self, message: &str, kind: NoticeKind) {
        let banner = Banner {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.to_string(),
            kind,
        };
        self.surface.mount(&banner);

        let surface = Arc::clone(&self.surface);
        let dismiss = Duration::from_millis(self.timing.dismiss_ms);
        let fade = Duration::from_millis(self.timing.fade_ms);
        let id = banner.id;
        spawn_timer(async move {
            tokio::time::sleep(dismiss).await;
            surface.fade(id);
            tokio::time::sleep(fade).await;
            surface.remove(id);
        });
    }

    /// Best-effort: a failed wrap is ignored.
    fn flash(&self, selection: &Selection) {
        if let Err(e) = self.surface.wrap_selection(selection) {
            tracing::debug!("selection flash skipped: {}", e);
            return;
        }
        let surface = Arc::clone(&self.surface);
        let hold = Duration::from_millis(self.timing.flash_ms);
        spawn_timer(async move {
            tokio::time::sleep(hold).await;
            surface.unwrap_selection();
        });
    }
}

fn spawn_timer<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => tracing::warn!("no async runtime; banner will not auto-dismiss"),
    }
}

/// What happened on a [`MemorySurface`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Mounted(Banner),
    Faded(u64),
    Removed(u64),
    Wrapped,
    Unwrapped,
}

/// Surface that records events instead of drawing. Used by headless
/// hosts and tests.
#[derive(Default)]
pub struct MemorySurface {
    events: Mutex<Vec<SurfaceEvent>>,
    refuse_wrap: bool,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface on which every selection wrap fails.
    pub fn refusing_wrap() -> Self {
        Self {
            refuse_wrap: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Banners mounted so far.
    pub fn banners(&self) -> Vec<Banner> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SurfaceEvent::Mounted(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: SurfaceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl BannerSurface for MemorySurface {
    fn mount(&self, banner: &Banner) {
        self.record(SurfaceEvent::Mounted(banner.clone()));
    }
    fn fade(&self, id: u64) {
        self.record(SurfaceEvent::Faded(id));
    }
    fn remove(&self, id: u64) {
        self.record(SurfaceEvent::Removed(id));
    }
    fn wrap_selection(&self, _selection: &Selection) -> anyhow::Result<()> {
        if self.refuse_wrap {
            anyhow::bail!("range cannot be wrapped");
        }
        self.record(SurfaceEvent::Wrapped);
        Ok(())
    }
    fn unwrap_selection(&self) {
        self.record(SurfaceEvent::Unwrapped);
    }
}

/// Terminal surface: prints each banner once on stderr.
pub struct StderrSurface;

impl BannerSurface for StderrSurface {
    fn mount(&self, banner: &Banner) {
        let mark = match banner.kind {
            NoticeKind::Success => "ok",
            NoticeKind::Error => "error",
        };
        eprintln!("[{}] {}", mark, banner.message);
    }
    fn fade(&self, _id: u64) {}
    fn remove(&self, _id: u64) {}
    fn wrap_selection(&self, _selection: &Selection) -> anyhow::Result<()> {
        anyhow::bail!("terminal cannot highlight a selection")
    }
    fn unwrap_selection(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn notifier(surface: Arc<MemorySurface>) -> BannerNotifier {
        BannerNotifier::new(surface, NotifierConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn banner_dismisses_itself() {
        let surface = Arc::new(MemorySurface::new());
        let n = notifier(surface.clone());

        n.show("Selection saved to ZgrWise!", NoticeKind::Success);
        assert_eq!(surface.banners().len(), 1);
        assert_eq!(surface.events().len(), 1);

        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(surface.events()[1], SurfaceEvent::Faded(1));
        assert_eq!(surface.events().len(), 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(surface.events()[2], SurfaceEvent::Removed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn show_returns_before_dismissal() {
        let surface = Arc::new(MemorySurface::new());
        let n = notifier(surface.clone());
        n.show("one", NoticeKind::Success);
        n.show("two", NoticeKind::Error);
        let banners = surface.banners();
        assert_eq!(banners.len(), 2);
        assert_eq!(banners[1].kind, NoticeKind::Error);
        assert_ne!(banners[0].id, banners[1].id);
    }

    #[tokio::test(start_paused = true)]
    async fn flash_unwraps_after_a_second() {
        let surface = Arc::new(MemorySurface::new());
        let n = notifier(surface.clone());
        let doc = Document::parse("<p>hello world</p>");
        let sel = Selection::find(&doc, "world").unwrap();

        n.flash(&sel);
        assert_eq!(surface.events(), vec![SurfaceEvent::Wrapped]);
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(
            surface.events(),
            vec![SurfaceEvent::Wrapped, SurfaceEvent::Unwrapped]
        );
    }

    #[tokio::test]
    async fn failed_flash_is_silent() {
        let surface = Arc::new(MemorySurface::refusing_wrap());
        let n = notifier(surface.clone());
        let doc = Document::parse("<p>hello</p>");
        let sel = Selection::find(&doc, "hello").unwrap();
        n.flash(&sel);
        assert!(surface.events().is_empty());
    }
}
