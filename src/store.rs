use crate::error::{RegistryError, Result};

/// Append-only payload storage with a fixed element budget.
///
/// The whole budget is reserved up front so the underlying buffer never
/// reallocates: an index handed out stays valid, and points at the same
/// memory, until the store is dropped.
pub struct BackingStore<T> {
    elements: Vec<T>,
    capacity: usize,
}

impl<T: Default> BackingStore<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Grow by one default-initialised element and return its index.
    pub fn append_uninitialized(&mut self) -> Result<u32> {
        let full = RegistryError::CapacityExceeded {
            what: "backing store",
            capacity: self.capacity,
        };
        if self.elements.len() >= self.capacity {
            return Err(full);
        }
        let index = u32::try_from(self.elements.len()).map_err(|_| full)?;
        self.elements.push(T::default());
        Ok(index)
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.elements.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.elements.get_mut(index as usize)
    }

    pub(crate) fn element_mut(&mut self, index: u32) -> Result<&mut T> {
        self.elements
            .get_mut(index as usize)
            .ok_or_else(|| RegistryError::NotFound(format!("backing store element {index}")))
    }

    /// Undo the most recent append. Only the last element can be rolled back.
    pub(crate) fn rollback(&mut self, index: u32) {
        debug_assert_eq!(index as usize + 1, self.elements.len());
        if index as usize + 1 == self.elements.len() {
            self.elements.pop();
        }
    }

    /// Drop whatever an evicted element still holds. The index stays taken.
    pub(crate) fn reset(&mut self, index: u32) {
        if let Some(element) = self.elements.get_mut(index as usize) {
            *element = T::default();
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.elements.len() >= self.capacity
    }
}
