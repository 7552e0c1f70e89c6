//! Desync detection during playback
//!
//! The simulation pushes its own checksum every time it computes one. The
//! checksums recorded by the original session arrive later as ordinary
//! `LogicChecksum` commands and are compared, in order, against the oldest
//! local value. Latency between the two is absorbed by the queue.

use std::collections::VecDeque;

/// Details of a checksum disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesyncReport {
    /// Frame the mismatching local checksum was computed on
    pub frame: u32,
    pub local_checksum: u32,
    pub recorded_checksum: u32,
}

/// Result of checking one recorded checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumVerdict {
    /// Checksum belongs to another player and was ignored
    Skipped,
    /// Compared equal, or the comparison was not meaningful yet
    Match,
    /// Values differ
    Mismatch {
        report: DesyncReport,
        /// First mismatch of the session; surface it to the user
        notify: bool,
        /// The simulation should pause
        pause: bool,
    },
}

/// Per-session checksum reconciliation queue.
#[derive(Debug, Clone)]
pub struct DesyncDetector {
    local_slot: i32,
    queue: VecDeque<u32>,
    skipped_first: bool,
    mismatch_seen: bool,
    mismatch_count: u32,
    first_mismatch: Option<DesyncReport>,
}

impl DesyncDetector {
    /// Create a detector for the given local slot (-1 for an observer).
    pub fn new(local_slot: i32, multiplayer: bool) -> Self {
        Self {
            local_slot,
            queue: VecDeque::new(),
            // Multiplayer sessions never transmit their first checksum, so the
            // first local value has nothing to pair with.
            skipped_first: !multiplayer,
            mismatch_seen: false,
            mismatch_count: 0,
            first_mismatch: None,
        }
    }

    pub fn local_slot(&self) -> i32 {
        self.local_slot
    }

    /// Queue a locally computed checksum.
    pub fn push_local(&mut self, checksum: u32) {
        if !self.skipped_first {
            self.skipped_first = true;
            tracing::debug!("dropping first local checksum {:08X}", checksum);
            return;
        }
        self.queue.push_back(checksum);
    }

    /// Take the oldest queued local checksum; 0 if none is pending.
    pub fn pop_local(&mut self) -> u32 {
        match self.queue.pop_front() {
            Some(value) => value,
            None => {
                tracing::debug!("local checksum queue empty");
                0
            }
        }
    }

    /// Number of local checksums waiting for their recorded counterpart
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Compare a recorded checksum from `player_index` against the queue.
    ///
    /// `focus_held` is true when some UI surface owns input focus; the
    /// simulation is not paused in that case.
    pub fn check(
        &mut self,
        frame: u32,
        player_index: i32,
        recorded: u32,
        focus_held: bool,
    ) -> ChecksumVerdict {
        if player_index != self.local_slot && self.local_slot >= 0 {
            return ChecksumVerdict::Skipped;
        }

        let local = self.pop_local();
        if frame == 0 || local == recorded {
            return ChecksumVerdict::Match;
        }

        // The queue may hold several checksums computed after the mismatching
        // one; step back over them to find the frame it first happened on.
        let report = DesyncReport {
            frame: frame.saturating_sub(self.queue.len() as u32 + 1),
            local_checksum: local,
            recorded_checksum: recorded,
        };
        self.mismatch_count += 1;

        if self.mismatch_seen {
            tracing::debug!(frame = report.frame, "further checksum mismatch");
            return ChecksumVerdict::Mismatch {
                report,
                notify: false,
                pause: false,
            };
        }

        self.mismatch_seen = true;
        self.first_mismatch = Some(report);
        tracing::warn!(
            "Replay has gone out of sync! InGame:{:08X} Replay:{:08X} Frame:{}",
            local,
            recorded,
            report.frame
        );
        ChecksumVerdict::Mismatch {
            report,
            notify: true,
            pause: !focus_held,
        }
    }

    /// Whether any mismatch was observed in this session
    pub fn saw_mismatch(&self) -> bool {
        self.mismatch_seen
    }

    /// Total mismatches, including those not surfaced
    pub fn mismatch_count(&self) -> u32 {
        self.mismatch_count
    }

    pub fn first_mismatch(&self) -> Option<DesyncReport> {
        self.first_mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_single_player() {
        let mut detector = DesyncDetector::new(0, false);
        for v in 1..=5 {
            detector.push_local(v);
        }
        let popped: Vec<u32> = (0..5).map(|_| detector.pop_local()).collect();
        assert_eq!(popped, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_fifo_multiplayer_drops_first() {
        let mut detector = DesyncDetector::new(0, true);
        for v in 1..=5 {
            detector.push_local(v);
        }
        assert_eq!(detector.pending(), 4);
        let popped: Vec<u32> = (0..4).map(|_| detector.pop_local()).collect();
        assert_eq!(popped, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_queue_yields_zero() {
        let mut detector = DesyncDetector::new(0, false);
        assert_eq!(detector.pop_local(), 0);
    }

    #[test]
    fn test_matching_checksums() {
        let mut detector = DesyncDetector::new(1, false);
        detector.push_local(0xAA);
        assert_eq!(detector.check(10, 1, 0xAA, false), ChecksumVerdict::Match);
        assert!(!detector.saw_mismatch());
    }

    #[test]
    fn test_other_player_skipped() {
        let mut detector = DesyncDetector::new(1, false);
        detector.push_local(0xAA);
        assert_eq!(detector.check(10, 2, 0xBB, false), ChecksumVerdict::Skipped);
        assert_eq!(detector.pending(), 1);
    }

    #[test]
    fn test_observer_checks_everyone() {
        let mut detector = DesyncDetector::new(-1, false);
        detector.push_local(0xAA);
        assert_eq!(detector.check(10, 3, 0xAA, false), ChecksumVerdict::Match);
    }

    #[test]
    fn test_frame_zero_never_mismatches() {
        let mut detector = DesyncDetector::new(0, false);
        detector.push_local(1);
        assert_eq!(detector.check(0, 0, 2, false), ChecksumVerdict::Match);
        assert_eq!(detector.pending(), 0);
    }

    #[test]
    fn test_mismatch_is_sticky() {
        let mut detector = DesyncDetector::new(0, false);
        detector.push_local(1);
        detector.push_local(2);

        let first = detector.check(100, 0, 9, false);
        let second = detector.check(101, 0, 9, false);

        let surfaced = [first, second]
            .iter()
            .filter(|v| matches!(v, ChecksumVerdict::Mismatch { notify: true, .. }))
            .count();
        assert_eq!(surfaced, 1);
        assert!(matches!(
            first,
            ChecksumVerdict::Mismatch {
                notify: true,
                pause: true,
                ..
            }
        ));
        assert!(matches!(
            second,
            ChecksumVerdict::Mismatch {
                notify: false,
                pause: false,
                ..
            }
        ));
        assert_eq!(detector.mismatch_count(), 2);
    }

    #[test]
    fn test_mismatch_frame_accounts_for_queue() {
        let mut detector = DesyncDetector::new(0, false);
        detector.push_local(1);
        detector.push_local(2);
        detector.push_local(3);

        // Two newer checksums remain queued after the pop
        match detector.check(50, 0, 99, true) {
            ChecksumVerdict::Mismatch {
                report,
                notify,
                pause,
            } => {
                assert_eq!(report.frame, 47);
                assert_eq!(report.local_checksum, 1);
                assert_eq!(report.recorded_checksum, 99);
                assert!(notify);
                assert!(!pause, "focus held suppresses pause");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert_eq!(detector.first_mismatch().map(|r| r.frame), Some(47));
    }
}
