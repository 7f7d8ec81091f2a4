//! Attribute-change notifications.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::frame_pipeline::VideoFrame;

/// Set of stream attributes that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const VID: EventMask = EventMask(1 << 0);
    pub const AID: EventMask = EventMask(1 << 1);
    pub const SIZE: EventMask = EventMask(1 << 2);
    pub const FPS: EventMask = EventMask(1 << 3);
    pub const BPS: EventMask = EventMask(1 << 4);
    pub const LENGTH: EventMask = EventMask(1 << 5);
    pub const CODEC: EventMask = EventMask(1 << 6);

    const NAMES: [(EventMask, &'static str); 7] = [
        (Self::VID, "vid"),
        (Self::AID, "aid"),
        (Self::SIZE, "size"),
        (Self::FPS, "fps"),
        (Self::BPS, "bps"),
        (Self::LENGTH, "length"),
        (Self::CODEC, "codec"),
    ];

    pub const fn empty() -> Self {
        EventMask(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        EventMask(bits & 0x7f)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: SmallVec<[&str; 7]> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Receives player notifications. Called on whichever thread caused the change.
pub trait MediaEventListener: Send + Sync {
    /// `when` is wall-clock time in milliseconds since the Unix epoch.
    fn attributes_changed(&self, player_id: u64, mask: EventMask, when: u64);

    fn new_frame_available(&self, _player_id: u64, _frame: &VideoFrame, _when: u64) {}
}

/// Copy-on-write listener registry.
///
/// Dispatch iterates an immutable snapshot, so listeners may be added or
/// removed while a notification is in flight.
#[derive(Default)]
pub struct ListenerList {
    listeners: RwLock<Arc<Vec<Arc<dyn MediaEventListener>>>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn MediaEventListener>) {
        let mut guard = self.listeners.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Removes `listener`, compared by identity. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn MediaEventListener>) -> bool {
        let mut guard = self.listeners.write();
        let before = guard.len();
        let next: Vec<_> = guard
            .iter()
            .filter(|l| !Arc::ptr_eq(l, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn MediaEventListener>>> {
        Arc::clone(&self.listeners.read())
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_attributes(&self, player_id: u64, mask: EventMask) {
        if mask.is_empty() {
            return;
        }
        let when = now_ms();
        log::debug!("player {player_id}: attributes changed {mask}");
        for listener in self.snapshot().iter() {
            listener.attributes_changed(player_id, mask, when);
        }
    }

    pub fn notify_new_frame(&self, player_id: u64, frame: &VideoFrame) {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            return;
        }
        let when = now_ms();
        for listener in listeners.iter() {
            listener.new_frame_available(player_id, frame, when);
        }
    }
}

impl fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList").field("len", &self.len()).finish()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        masks: Mutex<Vec<EventMask>>,
    }

    impl MediaEventListener for Recorder {
        fn attributes_changed(&self, _player_id: u64, mask: EventMask, _when: u64) {
            self.masks.lock().push(mask);
        }
    }

    /// Removes itself from the list it is registered with while being notified.
    struct SelfRemoving {
        list: Arc<ListenerList>,
        me: Mutex<Option<Arc<dyn MediaEventListener>>>,
    }

    impl MediaEventListener for SelfRemoving {
        fn attributes_changed(&self, _player_id: u64, _mask: EventMask, _when: u64) {
            if let Some(me) = self.me.lock().take() {
                assert!(self.list.remove(&me));
            }
        }
    }

    #[test]
    fn mask_operations() {
        let mask = EventMask::SIZE | EventMask::FPS;
        assert!(mask.contains(EventMask::SIZE));
        assert!(!mask.contains(EventMask::CODEC));
        assert_eq!(mask.bits(), 0b1100);
        assert_eq!(mask.to_string(), "[size, fps]");
        assert_eq!(EventMask::from_bits(0xff).bits(), 0x7f);
    }

    #[test]
    fn empty_masks_are_not_dispatched() {
        let list = ListenerList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(recorder.clone());
        list.notify_attributes(1, EventMask::empty());
        list.notify_attributes(1, EventMask::LENGTH);
        assert_eq!(*recorder.masks.lock(), vec![EventMask::LENGTH]);
    }

    #[test]
    fn listener_can_remove_itself_during_dispatch() {
        let list = Arc::new(ListenerList::new());
        let recorder = Arc::new(Recorder::default());
        let remover = Arc::new(SelfRemoving {
            list: Arc::clone(&list),
            me: Mutex::new(None),
        });
        let remover_dyn: Arc<dyn MediaEventListener> = remover.clone();
        *remover.me.lock() = Some(Arc::clone(&remover_dyn));
        list.add(remover_dyn);
        list.add(recorder.clone());

        list.notify_attributes(7, EventMask::VID);
        assert_eq!(list.len(), 1);
        // the snapshot taken before removal still reached the recorder
        assert_eq!(recorder.masks.lock().len(), 1);
    }
}
