//! Vote Aggregator
//!
//! Turns a noisy per-frame label stream into stable decisions. Labels are
//! collected into a fixed-size window; when the window fills, the most
//! frequent label wins (ties go to the label seen first in the window) and
//! the window starts over.

use std::collections::HashMap;

use crate::{defaults, CommandKind, GestureLabel, VoteError};

/// The fixed set of labels the classifier may produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<GestureLabel>,
}

impl Vocabulary {
    pub fn new<I, L>(labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<GestureLabel>,
    {
        let mut unique: Vec<GestureLabel> = Vec::new();
        for label in labels {
            let label = label.into();
            if !unique.contains(&label) {
                unique.push(label);
            }
        }
        Self { labels: unique }
    }

    pub fn contains(&self, label: &GestureLabel) -> bool {
        self.labels.contains(label)
    }

    pub fn labels(&self) -> &[GestureLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(["up", "down", "left", "right", "stop"])
    }
}

/// A stabilized decision produced from a full window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDecision {
    /// Winning label
    pub label: GestureLabel,
    /// Number of frames that voted for the winner
    pub votes: usize,
    /// Size of the window that was resolved
    pub window: usize,
}

/// Collects labels and resolves them by majority vote
#[derive(Debug)]
pub struct VoteAggregator {
    vocabulary: Vocabulary,
    window_size: usize,
    window: Vec<GestureLabel>,
}

impl VoteAggregator {
    /// Create an aggregator; `window_size` must be at least 1
    pub fn new(vocabulary: Vocabulary, window_size: usize) -> Result<Self, VoteError> {
        if window_size == 0 {
            return Err(VoteError::InvalidWindow);
        }
        Ok(Self {
            vocabulary,
            window_size,
            window: Vec::with_capacity(window_size),
        })
    }

    /// Observe one detected label
    pub fn observe(&mut self, label: GestureLabel) -> Result<Option<ResolvedDecision>, VoteError> {
        if !self.vocabulary.contains(&label) {
            return Err(VoteError::InvalidLabel(label));
        }

        self.window.push(label);
        if self.window.len() < self.window_size {
            return Ok(None);
        }

        let decision = resolve(&self.window);
        self.window.clear();
        Ok(Some(decision))
    }

    /// Change the window size. Labels collected so far are discarded.
    pub fn set_window_size(&mut self, window_size: usize) -> Result<(), VoteError> {
        if window_size == 0 {
            return Err(VoteError::InvalidWindow);
        }
        self.window_size = window_size;
        self.window = Vec::with_capacity(window_size);
        Ok(())
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Labels collected in the current window
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}

impl Default for VoteAggregator {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            window_size: defaults::VOTE_WINDOW,
            window: Vec::with_capacity(defaults::VOTE_WINDOW),
        }
    }
}

/// Majority vote over a non-empty window
fn resolve(window: &[GestureLabel]) -> ResolvedDecision {
    let mut counts: HashMap<&GestureLabel, usize> = HashMap::new();
    for label in window {
        *counts.entry(label).or_default() += 1;
    }

    // Walk in window order so the first-seen label keeps ties.
    let mut best: Option<(&GestureLabel, usize)> = None;
    for label in window {
        let count = counts[label];
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((label, count)),
        }
    }

    let (label, votes) = best.unwrap_or((&window[0], 0));
    ResolvedDecision {
        label: label.clone(),
        votes,
        window: window.len(),
    }
}

/// Fixed mapping from gesture labels to gateway commands
///
/// Labels mapped to `None` (or not mapped at all) resolve to "hold": no
/// command is enqueued.
#[derive(Debug, Clone)]
pub struct GestureMap {
    entries: HashMap<GestureLabel, Option<CommandKind>>,
}

impl GestureMap {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, label: impl Into<GestureLabel>, command: Option<CommandKind>) -> Self {
        self.entries.insert(label.into(), command);
        self
    }

    pub fn command_for(&self, label: &GestureLabel) -> Option<CommandKind> {
        self.entries.get(label).copied().flatten()
    }
}

impl Default for GestureMap {
    fn default() -> Self {
        Self::new()
            .with("up", Some(CommandKind::MoveUp))
            .with("down", Some(CommandKind::MoveDown))
            .with("left", Some(CommandKind::MoveLeft))
            .with("right", Some(CommandKind::MoveRight))
            .with("stop", None)
    }
}
