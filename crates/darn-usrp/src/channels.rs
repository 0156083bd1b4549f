//! Channel sets: ordered, duplicate-free, non-empty lists of channel indices.

use crate::error::{UsrpError, UsrpResult};
use crate::hal::StreamDirection;

/// Ordered channel indices for one direction.
///
/// Construction rejects empty and duplicated lists. Range checks need the
/// device's channel count and happen in [`ChannelSet::check_range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet(Vec<usize>);

impl ChannelSet {
    pub fn new(channels: impl Into<Vec<usize>>) -> UsrpResult<Self> {
        let channels = channels.into();
        if channels.is_empty() {
            return Err(UsrpError::config("channel set is empty"));
        }
        for (i, ch) in channels.iter().enumerate() {
            if channels[..i].contains(ch) {
                return Err(UsrpError::config(format!("channel {} listed twice", ch)));
            }
        }
        Ok(Self(channels))
    }

    /// Channels `0..count`.
    pub fn first(count: usize) -> UsrpResult<Self> {
        Self::new((0..count).collect::<Vec<_>>())
    }

    /// Fail if any channel is not below `num_channels`.
    pub fn check_range(&self, direction: StreamDirection, num_channels: usize) -> UsrpResult<()> {
        match self.0.iter().find(|&&ch| ch >= num_channels) {
            Some(ch) => Err(UsrpError::config(format!(
                "{} channel {} out of range ({} channels)",
                direction, ch, num_channels
            ))),
            None => Ok(()),
        }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<&[u32]> for ChannelSet {
    type Error = UsrpError;

    fn try_from(channels: &[u32]) -> UsrpResult<Self> {
        Self::new(channels.iter().map(|&c| c as usize).collect::<Vec<_>>())
    }
}

impl std::fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(ChannelSet::new(Vec::new()).is_err());
        assert!(ChannelSet::new(vec![0, 2, 0]).is_err());
        assert_eq!(ChannelSet::new(vec![2, 0]).unwrap().as_slice(), &[2, 0]);
    }

    #[test]
    fn test_range_check() {
        let set = ChannelSet::first(3).unwrap();
        assert!(set.check_range(StreamDirection::Tx, 3).is_ok());
        let err = set.check_range(StreamDirection::Tx, 2).unwrap_err();
        assert!(err.to_string().contains("tx channel 2"));
    }

    #[test]
    fn test_from_packet_channels() {
        let set = ChannelSet::try_from(&[1u32, 4][..]).unwrap();
        assert_eq!(set.to_string(), "[1, 4]");
        assert_eq!(set.len(), 2);
    }
}
