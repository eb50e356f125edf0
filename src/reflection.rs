//! Post-session reflection: mood, rating, journal, then insights.
//!
//! The buffer lives apart from the session timer, so resetting the timer
//! leaves an in-progress reflection alone.

use crate::error::{MindfulError, Result};

pub const QUICK_MOODS: [&str; 5] = ["Happy", "Calm", "Grateful", "Sad", "Stressed"];

pub const DETAILED_MOODS: [&str; 8] = [
    "Excited",
    "Peaceful",
    "Content",
    "Anxious",
    "Frustrated",
    "Tired",
    "Inspired",
    "Balanced",
];

pub const RATING_LABELS: [&str; 5] = ["Difficult", "Restless", "Okay", "Good", "Deeply peaceful"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReflectionStep {
    #[default]
    Mood,
    Rating,
    Journal,
    Insights,
}

impl ReflectionStep {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Mood => "How are you feeling?",
            Self::Rating => "How was your session?",
            Self::Journal => "Anything on your mind?",
            Self::Insights => "Your reflection",
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Mood => Self::Rating,
            Self::Rating => Self::Journal,
            Self::Journal | Self::Insights => Self::Insights,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Mood | Self::Rating => Self::Mood,
            Self::Journal => Self::Rating,
            Self::Insights => Self::Journal,
        }
    }
}

/// Resolve user input against the catalog, case-insensitively; free-form
/// moods are kept as typed.
pub fn canonical_mood(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let known = QUICK_MOODS
        .iter()
        .chain(DETAILED_MOODS.iter())
        .find(|m| m.eq_ignore_ascii_case(input));
    Some(known.map_or_else(|| input.to_string(), |m| m.to_string()))
}

/// What a finished reflection hands to session completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionInput {
    pub mood: String,
    pub rating: u8,
    pub journal: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reflection {
    step: ReflectionStep,
    mood: Option<String>,
    rating: Option<u8>,
    journal: String,
    max_chars: usize,
}

impl Reflection {
    pub fn new(max_chars: usize) -> Self {
        Self {
            step: ReflectionStep::Mood,
            mood: None,
            rating: None,
            journal: String::new(),
            max_chars,
        }
    }

    pub fn step(&self) -> ReflectionStep {
        self.step
    }

    pub fn mood(&self) -> Option<&str> {
        self.mood.as_deref()
    }

    pub fn rating(&self) -> Option<u8> {
        self.rating
    }

    pub fn journal(&self) -> &str {
        &self.journal
    }

    pub fn remaining_chars(&self) -> usize {
        self.max_chars.saturating_sub(self.journal.chars().count())
    }

    pub fn set_mood(&mut self, mood: &str) -> Result<()> {
        let mood = canonical_mood(mood).ok_or_else(|| MindfulError::validation("Mood cannot be empty"))?;
        self.mood = Some(mood);
        Ok(())
    }

    pub fn set_rating(&mut self, rating: u8) -> Result<()> {
        if !(1..=5).contains(&rating) {
            return Err(MindfulError::validation(format!(
                "Rating must be between 1 and 5, got {}",
                rating
            )));
        }
        self.rating = Some(rating);
        Ok(())
    }

    pub fn set_journal(&mut self, text: &str) -> Result<()> {
        let len = text.chars().count();
        if len > self.max_chars {
            return Err(MindfulError::validation(format!(
                "Journal entry is {} characters; the limit is {}",
                len, self.max_chars
            )));
        }
        self.journal = text.to_string();
        Ok(())
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn can_proceed(&self) -> bool {
        match self.step {
            ReflectionStep::Mood => self.mood.is_some(),
            ReflectionStep::Rating => self.rating.is_some(),
            ReflectionStep::Journal => true,
            ReflectionStep::Insights => false,
        }
    }

    pub fn next(&mut self) -> Result<ReflectionStep> {
        if !self.can_proceed() {
            return Err(MindfulError::invalid_state(match self.step {
                ReflectionStep::Mood => "Choose a mood first",
                ReflectionStep::Rating => "Rate your session first",
                _ => "The reflection is already at its last step",
            }));
        }
        self.step = self.step.next();
        Ok(self.step)
    }

    pub fn previous(&mut self) -> ReflectionStep {
        self.step = self.step.previous();
        self.step
    }

    /// Collect the answers; mood and rating are required
    pub fn finish(&self) -> Result<ReflectionInput> {
        let mood = self
            .mood
            .clone()
            .ok_or_else(|| MindfulError::validation("A mood is required"))?;
        let rating = self
            .rating
            .ok_or_else(|| MindfulError::validation("A rating is required"))?;
        let journal = self.journal.trim();
        Ok(ReflectionInput {
            mood,
            rating,
            journal: (!journal.is_empty()).then(|| journal.to_string()),
        })
    }
}
