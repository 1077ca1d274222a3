//! Topic parsing and matching.
//!
//! A topic is a `/`-separated sequence of level specifiers. Two topics match
//! iff their level sequences are identical length-for-length and
//! element-for-element; there is no wildcard matching in the base design, but
//! the leveled representation is the extension point for one. `+` and `#`
//! are reserved and rejected inside levels.

use std::fmt::{self, Write};
use std::{ops, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TopicError {
    InvalidTopic(String),
    InvalidLevel(String),
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::InvalidTopic(s) => {
                write!(f, "InvalidTopic({})", s)
            }
            TopicError::InvalidLevel(s) => {
                write!(f, "InvalidLevel({})", s)
            }
        }
    }
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Serialize, Deserialize)]
pub enum Level {
    Normal(String),
    Blank,
}

impl Level {
    pub fn parse<T: AsRef<str>>(s: T) -> Result<Level, TopicError> {
        Level::from_str(s.as_ref())
    }

    pub fn normal<T: AsRef<str>>(s: T) -> Result<Level, TopicError> {
        if s.as_ref().contains(['+', '#']) {
            return Err(TopicError::InvalidLevel(format!(
                "invalid level `{}` contains reserved +|#",
                s.as_ref()
            )));
        }
        Ok(Level::Normal(String::from(s.as_ref())))
    }

    #[inline]
    pub fn value(&self) -> Option<&str> {
        match *self {
            Level::Normal(ref s) => Some(s),
            Level::Blank => None,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        match *self {
            Level::Normal(ref s) => !s.contains(['+', '#']),
            Level::Blank => true,
        }
    }
}

impl FromStr for Level {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        match s {
            "" => Ok(Level::Blank),
            _ => Level::normal(s),
        }
    }
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Serialize, Deserialize)]
pub struct Topic(Vec<Level>);

impl Topic {
    #[inline]
    pub fn levels(&self) -> &Vec<Level> {
        &self.0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|level| level.is_valid())
    }

    /// Exact level-for-level match; symmetric.
    pub fn matches(&self, topic: &Topic) -> bool {
        self.0 == topic.0
    }

    pub fn matches_str<S: AsRef<str> + ?Sized>(&self, topic: &S) -> bool {
        let mut lhs = self.0.iter();
        for rhs in topic.as_ref().split('/') {
            match lhs.next() {
                Some(Level::Normal(s)) if s == rhs => continue,
                Some(Level::Blank) if rhs.is_empty() => continue,
                _ => return false,
            }
        }
        lhs.next().is_none()
    }
}

impl From<Vec<Level>> for Topic {
    fn from(v: Vec<Level>) -> Self {
        Topic(v)
    }
}

impl From<Topic> for Vec<Level> {
    fn from(t: Topic) -> Self {
        t.0
    }
}

impl ops::Deref for Topic {
    type Target = Vec<Level>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        s.split('/').map(Level::from_str).collect::<Result<Vec<_>, TopicError>>().map(Topic).and_then(
            |topic| {
                if topic.is_valid() {
                    Ok(topic)
                } else {
                    Err(TopicError::InvalidTopic(format!("invalid topic `{}`", s)))
                }
            },
        )
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Normal(ref s) => f.write_str(s.as_str()),
            Level::Blank => Ok(()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for level in &self.0 {
            if first {
                first = false;
            } else {
                f.write_char('/')?;
            }

            level.fmt(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level() {
        assert_eq!(Level::normal("sensor").unwrap().value(), Some("sensor"));
        assert_eq!(Level::normal("sensor").unwrap(), "sensor".parse().expect(""));
        assert_eq!(Level::parse("").unwrap(), Level::Blank);

        assert!(Level::normal("sensor#").is_err());
        assert!(Level::normal("se+nsor").is_err());
    }

    #[test]
    fn test_parse_topic() {
        let t: Topic = "sensor/temperature/kitchen".parse().expect("");
        assert_eq!(t.levels().len(), 3);
        assert_eq!(t.to_string(), "sensor/temperature/kitchen");

        assert!("sensor/+/kitchen".parse::<Topic>().is_err());
        assert!("sensor/#".parse::<Topic>().is_err());

        let t: Topic = "/leading".parse().expect("");
        assert_eq!(t.levels()[0], Level::Blank);
        assert_eq!(t.to_string(), "/leading");
    }

    #[test]
    fn test_exact_matching() {
        let a: Topic = "sensor/temperature".parse().expect("");
        let b: Topic = "sensor/temperature".parse().expect("");
        let c: Topic = "sensor/humidity".parse().expect("");
        let longer: Topic = "sensor/temperature/kitchen".parse().expect("");

        assert!(a.matches(&a));
        assert!(a.matches(&b));
        assert!(b.matches(&a)); // symmetric
        assert!(!a.matches(&c));
        assert!(!c.matches(&a));

        // Differing level counts never match.
        assert!(!a.matches(&longer));
        assert!(!longer.matches(&a));
    }

    #[test]
    fn test_matches_str() {
        let t: Topic = "sensor/temperature".parse().expect("");
        assert!(t.matches_str("sensor/temperature"));
        assert!(!t.matches_str("sensor"));
        assert!(!t.matches_str("sensor/temperature/kitchen"));
        assert!(!t.matches_str("sensor/humidity"));

        let t: Topic = "a//b".parse().expect("");
        assert!(t.matches_str("a//b"));
        assert!(!t.matches_str("a/b"));
    }
}
