//! Faces waiting for the operator to classify them
//!
//! Positions are 1-based to match the classification view's paging. Every
//! structural change is published as a [`BufferEvent`] so a display layer can
//! re-render incrementally.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::face::FaceImage;

const EVENT_CAPACITY: usize = 256;

/// Structural change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
    /// A face was appended at `position`
    Added { position: usize },
    /// The face at `position` was removed; later faces shifted down by one
    Removed { position: usize },
    /// The face at `position` changed its label
    Updated { position: usize },
    /// All faces were dropped
    Cleared,
    /// Content was replaced wholesale with `len` faces
    Replaced { len: usize },
}

pub struct FaceBuffer {
    faces: Mutex<Vec<FaceImage>>,
    events: broadcast::Sender<BufferEvent>,
}

impl Default for FaceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceBuffer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            faces: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Receives every change made after this call
    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FaceImage>> {
        self.faces.lock().expect("face buffer lock poisoned")
    }

    /// Called with the buffer lock held so events keep mutation order
    fn publish(&self, _faces: &MutexGuard<'_, Vec<FaceImage>>, event: BufferEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends a face and returns its position
    pub fn push(&self, face: FaceImage) -> usize {
        let mut faces = self.lock();
        faces.push(face);
        let position = faces.len();
        self.publish(&faces, BufferEvent::Added { position });
        position
    }

    pub fn get(&self, position: usize) -> Option<FaceImage> {
        let index = position.checked_sub(1)?;
        self.lock().get(index).cloned()
    }

    /// Removes the face at `position`; out-of-range positions are ignored
    pub fn remove(&self, position: usize) -> Option<FaceImage> {
        let mut faces = self.lock();
        let index = position.checked_sub(1).filter(|i| *i < faces.len())?;
        let removed = faces.remove(index);
        self.publish(&faces, BufferEvent::Removed { position });
        Some(removed)
    }

    /// Sets the label of the face at `position`
    ///
    /// # Returns
    /// The previous label with a copy of the relabelled face, or `None` if
    /// `position` is out of range
    pub fn set_folder(&self, position: usize, folder_name: &str) -> Option<(String, FaceImage)> {
        let mut faces = self.lock();
        let face = position.checked_sub(1).and_then(|i| faces.get_mut(i))?;
        let previous = std::mem::replace(&mut face.folder_name, folder_name.to_string());
        let updated = face.clone();
        self.publish(&faces, BufferEvent::Updated { position });
        Some((previous, updated))
    }

    pub fn clear(&self) {
        let mut faces = self.lock();
        faces.clear();
        self.publish(&faces, BufferEvent::Cleared);
    }

    pub fn replace_all(&self, faces: Vec<FaceImage>) {
        let len = faces.len();
        let mut current = self.lock();
        *current = faces;
        self.publish(&current, BufferEvent::Replaced { len });
    }

    /// Copy of the current content; pixels are shared, not duplicated
    pub fn snapshot(&self) -> Vec<FaceImage> {
        self.lock().clone()
    }

    pub fn has_unclassified(&self) -> bool {
        self.lock().iter().any(|face| !face.is_classified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn face(name: &str) -> FaceImage {
        FaceImage::detected(RgbImage::new(2, 2), name.to_string())
    }

    #[test]
    fn test_positions_are_one_based() {
        let buffer = FaceBuffer::new();
        assert_eq!(buffer.push(face("a")), 1);
        assert_eq!(buffer.push(face("b")), 2);

        assert!(buffer.get(0).is_none());
        assert_eq!(buffer.get(1).unwrap().file_name(), "a");
        assert_eq!(buffer.get(2).unwrap().file_name(), "b");
        assert!(buffer.get(3).is_none());
    }

    #[test]
    fn test_remove_out_of_range_is_noop() {
        let buffer = FaceBuffer::new();
        buffer.push(face("a"));
        buffer.push(face("b"));
        let mut events = buffer.subscribe();

        assert!(buffer.remove(0).is_none());
        assert!(buffer.remove(3).is_none());
        assert!(buffer.remove(usize::MAX).is_none());
        assert_eq!(buffer.len(), 2);
        assert!(events.try_recv().is_err());

        assert_eq!(buffer.remove(1).unwrap().file_name(), "a");
        assert_eq!(buffer.get(1).unwrap().file_name(), "b");
        assert_eq!(events.try_recv().unwrap(), BufferEvent::Removed { position: 1 });
    }

    #[test]
    fn test_set_folder_returns_previous_label() {
        let buffer = FaceBuffer::new();
        buffer.push(face("a"));
        assert!(buffer.has_unclassified());

        assert_eq!(buffer.set_folder(1, "cat").unwrap().0, "");
        let (previous, updated) = buffer.set_folder(1, "dog").unwrap();
        assert_eq!(previous, "cat");
        assert_eq!(updated.folder_name, "dog");
        assert!(buffer.set_folder(2, "dog").is_none());
        assert_eq!(buffer.get(1).unwrap().folder_name, "dog");
        assert!(!buffer.has_unclassified());
    }

    #[test]
    fn test_events_follow_changes() {
        let buffer = FaceBuffer::new();
        let mut events = buffer.subscribe();

        buffer.push(face("a"));
        buffer.set_folder(1, "cat");
        buffer.replace_all(vec![face("x"), face("y"), face("z")]);
        buffer.clear();

        assert_eq!(events.try_recv().unwrap(), BufferEvent::Added { position: 1 });
        assert_eq!(events.try_recv().unwrap(), BufferEvent::Updated { position: 1 });
        assert_eq!(events.try_recv().unwrap(), BufferEvent::Replaced { len: 3 });
        assert_eq!(events.try_recv().unwrap(), BufferEvent::Cleared);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_concurrent_events_replay_in_order() {
        let buffer = std::sync::Arc::new(FaceBuffer::new());
        let mut events = buffer.subscribe();

        let workers: Vec<_> = (0..2)
            .map(|worker| {
                let buffer = std::sync::Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..40 {
                        buffer.push(face(&format!("{}_{}", worker, i)));
                    }
                })
            })
            .collect();
        let remover = {
            let buffer = std::sync::Arc::clone(&buffer);
            std::thread::spawn(move || {
                for _ in 0..40 {
                    buffer.remove(1);
                }
            })
        };
        for worker in workers {
            worker.join().unwrap();
        }
        remover.join().unwrap();

        // Replaying the events must reproduce every intermediate length
        let mut len = 0usize;
        while let Ok(event) = events.try_recv() {
            match event {
                BufferEvent::Added { position } => {
                    len += 1;
                    assert_eq!(position, len);
                }
                BufferEvent::Removed { position } => {
                    assert!(position <= len);
                    len -= 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(len, buffer.len());
    }
}
