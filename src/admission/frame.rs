//! Frame data model and structural validation (spec.md §3).
//!
//! Fragmentation invariants — a contiguous run of `MORE` flags followed by
//! a final frame, and `frag_seq` starting at zero and incrementing by one
//! per fragment of the same message — are checked here rather than in the
//! (external, out of scope) wire codec, so any caller assembling frames
//! from any transport gets the same validation.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Syn,
    Data,
    Ack,
    Fin,
    Rst,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub session: String,
    pub nonce: String,
    pub ts_ms: u64,
    pub frag_seq: u32,
    pub more: bool,
    pub cost_micros: u64,
    pub payload_len: usize,
    pub flags: Vec<String>,
}

/// Tracks fragment contiguity for one in-progress message. A session may
/// have at most one open fragmentation run at a time: starting a new `Syn`
/// while a prior run is incomplete is itself a validation error.
#[derive(Default)]
pub struct FragmentTracker {
    next_seq: u32,
    open: bool,
}

impl FragmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and advances the tracker for the next frame of a message.
    /// A `Syn` frame (or a standalone `Data` frame with `more == false` and
    /// `frag_seq == 0`) starts a run; each subsequent `more == true` frame
    /// must supply `frag_seq` one greater than the last; the run closes on
    /// the first frame with `more == false`.
    pub fn validate(&mut self, frame: &Frame) -> Result<(), &'static str> {
        if frame.kind == FrameKind::Syn && self.open {
            return Err("new fragmentation run started before previous one closed");
        }
        if frame.kind == FrameKind::Syn {
            self.next_seq = 0;
            self.open = true;
        }
        if self.open {
            if frame.frag_seq != self.next_seq {
                return Err("frag_seq is not contiguous");
            }
            self.next_seq += 1;
            if !frame.more {
                self.open = false;
            }
        }
        Ok(())
    }
}

/// Appends the ECN marker to a frame's flags if not already present,
/// signalling congestion to the sender without dropping the frame.
/// Grounded in `original_source/services/router/ecn.py`'s `mark_ecn`.
pub fn mark_ecn(frame: &mut Frame) -> bool {
    if frame.flags.iter().any(|f| f == "ECN") {
        return false;
    }
    frame.flags.push("ECN".to_string());
    true
}
