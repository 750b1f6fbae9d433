use std::collections::VecDeque;

/// Bounded undo stack. The oldest state is evicted once `capacity` is reached.
pub struct History<State> {
    undos: VecDeque<State>,
    capacity: usize,
}

impl<State> History<State> {
    pub fn new(capacity: usize) -> Self {
        Self {
            undos: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn has_undo(&self) -> bool {
        !self.undos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undos.is_empty()
    }

    pub fn undo(&mut self) -> Option<State> {
        self.undos.pop_back()
    }

    pub fn clear(&mut self) {
        self.undos.clear();
    }
}

impl<State: PartialEq> History<State> {
    /// Pushes a snapshot unless it equals the most recent one.
    pub fn push(&mut self, state: State) {
        if self.undos.back() == Some(&state) {
            return;
        }

        if self.undos.len() == self.capacity {
            self.undos.pop_front();
        }
        self.undos.push_back(state);
    }
}
