use crate::error::QueueError;
use crate::model::{Direction, PlaybackItem};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved { index: usize, wrapped: bool },
    Exhausted,
}

impl Advance {
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Moved { index, .. } => Some(index),
            Self::Exhausted => None,
        }
    }
}

/// Ordered items plus the cursor that decides what plays next.
///
/// `counter` walks `0..len` once per cycle. Without shuffle it is the
/// resolved index; with shuffle it indexes into `permutation`. A fresh
/// permutation is drawn at construction and every time the counter wraps.
#[derive(Debug)]
pub struct PlaybackQueue {
    items: Vec<PlaybackItem>,
    position: Option<usize>,
    counter: Option<usize>,
    cycle: u64,
    permutation: Vec<usize>,
    shuffle: bool,
    repeat: bool,
    rng: SmallRng,
}

impl PlaybackQueue {
    pub fn new(items: Vec<PlaybackItem>, shuffle: bool, repeat: bool) -> Self {
        Self::with_rng(items, shuffle, repeat, SmallRng::from_os_rng())
    }

    pub fn with_seed(items: Vec<PlaybackItem>, shuffle: bool, repeat: bool, seed: u64) -> Self {
        Self::with_rng(items, shuffle, repeat, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(items: Vec<PlaybackItem>, shuffle: bool, repeat: bool, rng: SmallRng) -> Self {
        let mut queue = Self {
            items,
            position: None,
            counter: None,
            cycle: 0,
            permutation: Vec::new(),
            shuffle,
            repeat,
            rng,
        };
        queue.rebuild_permutation();
        queue
    }

    pub fn start(&mut self, start_index: Option<usize>) -> Result<usize, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::EmptyQueue);
        }

        self.position = None;
        self.counter = None;

        let Some(requested) = start_index else {
            return self.advance(Direction::Next).index().ok_or(QueueError::EmptyQueue);
        };

        let index = requested % self.items.len();
        if self.shuffle {
            // Keep the first cycle a bijection by giving the start item slot 0.
            if let Some(slot) = self.permutation.iter().position(|idx| *idx == index) {
                self.permutation.swap(0, slot);
            }
            self.counter = Some(0);
        } else {
            self.counter = Some(index);
        }
        self.position = Some(index);
        Ok(index)
    }

    pub fn advance(&mut self, direction: Direction) -> Advance {
        if self.items.is_empty() {
            return Advance::Exhausted;
        }

        let advance = match direction {
            Direction::Next => self.next(),
            Direction::Previous => self.previous(),
            Direction::JumpTo(requested) => {
                let index = requested % self.items.len();
                self.counter = Some(index);
                Advance::Moved {
                    index,
                    wrapped: false,
                }
            }
        };

        if let Advance::Moved { index, .. } = advance {
            self.position = Some(index);
        }
        advance
    }

    fn next(&mut self) -> Advance {
        let first = self.step_forward();
        let Advance::Moved { index, wrapped } = first else {
            return first;
        };

        if self.shuffle && self.items.len() > 1 && Some(index) == self.position {
            return match self.step_forward() {
                Advance::Moved {
                    index,
                    wrapped: again,
                } => Advance::Moved {
                    index,
                    wrapped: wrapped || again,
                },
                Advance::Exhausted => Advance::Exhausted,
            };
        }

        first
    }

    fn step_forward(&mut self) -> Advance {
        let len = self.items.len();
        let candidate = self.counter.map_or(0, |counter| counter + 1);

        let (counter, wrapped) = if candidate >= len {
            if !self.repeat {
                return Advance::Exhausted;
            }
            self.roll_cycle();
            (0, true)
        } else {
            (candidate, false)
        };

        self.counter = Some(counter);
        Advance::Moved {
            index: self.resolve(counter),
            wrapped,
        }
    }

    fn previous(&mut self) -> Advance {
        let len = self.items.len();
        let (counter, wrapped) = match self.counter {
            Some(counter) if counter > 0 => (counter - 1, false),
            _ => {
                self.roll_cycle();
                (len - 1, true)
            }
        };

        self.counter = Some(counter);
        Advance::Moved {
            index: self.resolve(counter),
            wrapped,
        }
    }

    fn resolve(&self, counter: usize) -> usize {
        if self.shuffle {
            self.permutation.get(counter).copied().unwrap_or(counter)
        } else {
            counter
        }
    }

    fn roll_cycle(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
        self.rebuild_permutation();
    }

    fn rebuild_permutation(&mut self) {
        self.permutation = (0..self.items.len()).collect();
        self.permutation.shuffle(&mut self.rng);
    }

    pub fn current(&self) -> Result<&PlaybackItem, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        let index = self.position.unwrap_or(0);
        self.items.get(index).ok_or(QueueError::EmptyQueue)
    }

    pub fn set_shuffle(&mut self, shuffle: bool) -> bool {
        if self.shuffle == shuffle {
            return false;
        }
        self.shuffle = shuffle;

        if let Some(position) = self.position {
            self.counter = if shuffle {
                self.permutation
                    .iter()
                    .position(|idx| *idx == position)
                    .or(self.counter)
            } else {
                Some(position)
            };
        }
        true
    }

    pub fn set_repeat(&mut self, repeat: bool) -> bool {
        let changed = self.repeat != repeat;
        self.repeat = repeat;
        changed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, index: usize) -> Option<&PlaybackItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[PlaybackItem] {
        &self.items
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn counter(&self) -> Option<usize> {
        self.counter
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }
}
