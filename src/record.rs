//! Timing record stored at every tree node
//!
//! A record carries a name, the accumulated elapsed time and an ordered list
//! of free-form annotations ("comments"). Names and comment keys use
//! `Cow<'static, str>` so the common case of literal names costs no
//! allocation.

use std::borrow::Cow;
use std::time::Duration;

/// A `(key, value)` annotation attached to a record
pub type Comment = (Cow<'static, str>, String);

/// Name, elapsed time and annotations of one timed region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Accumulated time; only ever increased after creation
    pub elapsed: Duration,
    pub name: Cow<'static, str>,
    /// Insertion ordered, keys may repeat
    pub comments: Vec<Comment>,
}

impl Record {
    /// Create a record with zero elapsed time and no comments
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Record {
            elapsed: Duration::ZERO,
            name: name.into(),
            comments: Vec::new(),
        }
    }

    /// Set the initial elapsed time
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Builder form of [`Record::add_comment`]
    pub fn with_comment<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: CommentValue,
    {
        self.add_comment(key, value);
        self
    }

    /// Append an annotation
    ///
    /// Only strings, booleans and numbers are accepted as values; anything
    /// else is rejected at compile time through the [`CommentValue`] bound.
    pub fn add_comment<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Cow<'static, str>>,
        V: CommentValue,
    {
        self.comments.push((key.into(), value.into_comment()));
    }

    /// Look up the first comment stored under `key`
    pub fn comment(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn elapsed_nanos(&self) -> u128 {
        self.elapsed.as_nanos()
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Values that can be attached to a record as a comment
///
/// Sealed: the set of accepted types is closed.
pub trait CommentValue: sealed::Sealed {
    fn into_comment(self) -> String;
}

macro_rules! display_comment_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl CommentValue for $ty {
                fn into_comment(self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_comment_value!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool,
    &str, &String,
);

impl sealed::Sealed for String {}
impl CommentValue for String {
    fn into_comment(self) -> String {
        self
    }
}

impl sealed::Sealed for Cow<'_, str> {}
impl CommentValue for Cow<'_, str> {
    fn into_comment(self) -> String {
        self.into_owned()
    }
}
