//! Disposal watcher
//!
//! Re-parenting shows up as a detach followed by an attach, and the
//! transport may report both within one tick. Acting on the detach alone
//! would misfire, so every parent change is re-checked on the next tick and
//! only an object still detached by then counts as disposed.

use std::sync::Arc;

use tokio::task::JoinHandle;

use ferry_core::ObjectId;
use ferry_transport::Transport;

/// Handle to a running watch
#[derive(Debug)]
pub struct DisposalWatch {
    object: ObjectId,
    handle: JoinHandle<()>,
}

impl DisposalWatch {
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Whether the watch has ended (fired or cancelled)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop watching without firing
    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Call `on_disposed` once `object` has been detached for a full tick.
///
/// Fires at most once. Dropping the returned handle leaves the watch running.
pub fn watch<F>(transport: Arc<dyn Transport>, object: ObjectId, on_disposed: F) -> DisposalWatch
where
    F: FnOnce() + Send + 'static,
{
    // Subscribe before spawning so no change between here and the first
    // poll is lost. An object that is already gone yields no stream.
    let mut changes = transport.watch_parent(object).ok();

    let handle = tokio::spawn(async move {
        loop {
            let closed = match changes.as_mut() {
                Some(rx) => rx.recv().await.is_none(),
                None => true,
            };

            transport.next_tick().await;

            if transport.parent_of(object).is_none() {
                tracing::trace!(%object, "disposed");
                on_disposed();
                return;
            }
            if closed {
                return;
            }
            tracing::trace!(%object, "re-parented, still live");
        }
    });

    DisposalWatch { object, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use ferry_transport::{ObjectKind, Scene};

    struct Fixture {
        scene: Arc<Scene>,
        fired: Arc<AtomicUsize>,
        a: ObjectId,
        b: ObjectId,
        obj: ObjectId,
    }

    fn fixture() -> Fixture {
        let scene = Arc::new(Scene::new());
        let a = scene.insert(ObjectKind::Folder, "a", None, Bytes::new()).unwrap();
        let b = scene.insert(ObjectKind::Folder, "b", None, Bytes::new()).unwrap();
        let obj = scene.insert(ObjectKind::Item, "obj", Some(a), Bytes::new()).unwrap();
        Fixture {
            scene,
            fired: Arc::new(AtomicUsize::new(0)),
            a,
            b,
            obj,
        }
    }

    fn counting_watch(f: &Fixture) -> DisposalWatch {
        let fired = f.fired.clone();
        watch(f.scene.clone(), f.obj, move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_destroy_fires_once_after_one_tick() {
        let f = fixture();
        let handle = counting_watch(&f);
        settle().await;

        f.scene.destroy(f.obj);
        settle().await;
        assert_eq!(f.fired.load(Ordering::SeqCst), 0, "must wait for the tick");

        f.scene.step();
        settle().await;
        assert_eq!(f.fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());

        f.scene.step();
        settle().await;
        assert_eq!(f.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_move_within_tick_does_not_fire() {
        let f = fixture();
        let handle = counting_watch(&f);
        settle().await;

        f.scene.set_parent(f.obj, None).unwrap();
        f.scene.set_parent(f.obj, Some(f.b)).unwrap();
        for _ in 0..4 {
            f.scene.step();
            settle().await;
        }

        assert_eq!(f.fired.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());
        assert_eq!(f.scene.parent_of(f.obj), Some(f.b));
    }

    #[tokio::test]
    async fn test_detach_then_reattach_next_tick_fires() {
        let f = fixture();
        let _handle = counting_watch(&f);
        settle().await;

        f.scene.set_parent(f.obj, None).unwrap();
        settle().await;
        f.scene.step();
        settle().await;
        f.scene.set_parent(f.obj, Some(f.a)).unwrap();

        assert_eq!(f.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_watch() {
        let f = fixture();
        let handle = counting_watch(&f);
        handle.cancel();

        f.scene.destroy(f.obj);
        f.scene.step();
        settle().await;

        assert_eq!(f.fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watching_missing_object_fires() {
        let scene = Arc::new(Scene::new());
        let _heartbeat = scene.spawn_heartbeat();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = watch(scene.clone(), ObjectId::new(404), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(handle.object(), ObjectId::new(404));
    }
}
