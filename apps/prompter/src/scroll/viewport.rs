use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::state::{Settings, clamp_percent};

/// A scrollable text surface.
pub trait Viewport: Send + Sync {
    fn scroll_top(&self) -> f64;
    /// Moves the view. Implementations may clamp the requested offset.
    fn set_scroll_top(&self, top: f64);
    fn scroll_height(&self) -> f64;
    fn client_height(&self) -> f64;
}

/// Scrollable range in pixels; never negative.
pub fn scroll_extent(viewport: &dyn Viewport) -> f64 {
    (viewport.scroll_height() - viewport.client_height()).max(0.0)
}

/// Current position as a percentage of the scrollable range. A viewport
/// with nothing to scroll is always at 0.
pub fn percent_of(viewport: &dyn Viewport) -> f64 {
    let extent = scroll_extent(viewport);
    if extent <= 0.0 {
        return 0.0;
    }
    clamp_percent(viewport.scroll_top() / extent * 100.0)
}

pub fn top_for_percent(viewport: &dyn Viewport, percent: f64) -> f64 {
    clamp_percent(percent) / 100.0 * scroll_extent(viewport)
}

type ScrollObserver = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Geometry {
    top: f64,
    content_height: f64,
    client_height: f64,
    clamp_slack: f64,
}

impl Geometry {
    fn max_top(&self) -> f64 {
        (self.content_height - self.client_height - self.clamp_slack).max(0.0)
    }
}

/// In-memory viewport used by the terminal front end and tests.
///
/// Like a browser scroll container it clamps offsets and notifies its
/// observer whenever the offset actually changes.
pub struct VirtualViewport {
    geometry: Mutex<Geometry>,
    observer: RwLock<Option<ScrollObserver>>,
}

impl VirtualViewport {
    pub fn new(content_height: f64, client_height: f64) -> Self {
        Self {
            geometry: Mutex::new(Geometry {
                top: 0.0,
                content_height: content_height.max(0.0),
                client_height: client_height.max(0.0),
                clamp_slack: 0.0,
            }),
            observer: RwLock::new(None),
        }
    }

    /// Stops scrolling `slack` pixels short of the true end, like surfaces
    /// that round the final offset down.
    pub fn with_clamp_slack(self, slack: f64) -> Self {
        self.geometry.lock().clamp_slack = slack.max(0.0);
        self
    }

    pub fn on_scroll(&self, observer: impl Fn() + Send + Sync + 'static) {
        *self.observer.write() = Some(Arc::new(observer));
    }

    pub fn set_content_height(&self, height: f64) {
        let mut geometry = self.geometry.lock();
        geometry.content_height = height.max(0.0);
        geometry.top = geometry.top.min(geometry.max_top());
    }

    /// Sizes the content for `lines` rows of text rendered with `settings`.
    pub fn layout(&self, lines: usize, settings: &Settings) {
        let row = f64::from(settings.font_size) * settings.line_height;
        self.set_content_height(lines as f64 * row);
    }

    /// Fraction of rows above the top edge, for rendering.
    pub fn first_visible_line(&self, lines: usize) -> usize {
        let geometry = *self.geometry.lock();
        if lines == 0 || geometry.content_height <= 0.0 {
            return 0;
        }
        let fraction = geometry.top / geometry.content_height;
        ((fraction * lines as f64).floor() as usize).min(lines - 1)
    }
}

impl Viewport for VirtualViewport {
    fn scroll_top(&self) -> f64 {
        self.geometry.lock().top
    }

    fn set_scroll_top(&self, top: f64) {
        let moved = {
            let mut geometry = self.geometry.lock();
            let next = if top.is_finite() {
                top.clamp(0.0, geometry.max_top())
            } else {
                geometry.top
            };
            let moved = next != geometry.top;
            geometry.top = next;
            moved
        };
        if moved {
            let observer = self.observer.read().clone();
            if let Some(observer) = observer {
                observer();
            }
        }
    }

    fn scroll_height(&self) -> f64 {
        self.geometry.lock().content_height
    }

    fn client_height(&self) -> f64 {
        self.geometry.lock().client_height
    }
}
