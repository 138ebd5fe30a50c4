//! Call quality statistics
//!
//! A [`StatsCollector`] polls the live peer connection on an interval and
//! turns consecutive raw [`StatsSnapshot`]s into [`QualityReport`]s.
//! Purely observational; nothing here feeds back into negotiation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::media::MediaKind;
use crate::peer::{IceConnectionState, PeerConnection, PeerConnectionState, SignalingState};

/// Raw per-SSRC inbound RTP sample
#[derive(Debug, Clone)]
pub struct RtpInboundStats {
    /// Track kind the SSRC carries
    pub kind: MediaKind,
    /// Cumulative payload bytes received
    pub bytes_received: u64,
    /// Cumulative packets received
    pub packets_received: u64,
    /// Cumulative packets lost (may be negative with duplicates)
    pub packets_lost: i64,
    /// Interarrival jitter in seconds
    pub jitter_secs: f64,
    /// Decoded frame rate, when the backend reports one
    pub frames_per_second: Option<f64>,
    /// Frame width, when the backend reports one
    pub frame_width: Option<u32>,
    /// Frame height, when the backend reports one
    pub frame_height: Option<u32>,
}

/// Raw per-SSRC outbound RTP sample
#[derive(Debug, Clone)]
pub struct RtpOutboundStats {
    /// Track kind the SSRC carries
    pub kind: MediaKind,
    /// Cumulative payload bytes sent
    pub bytes_sent: u64,
    /// Cumulative packets sent
    pub packets_sent: u64,
    /// Packets the remote end reports lost, when available
    pub remote_packets_lost: Option<i64>,
    /// Encoded frame rate, when the backend reports one
    pub frames_per_second: Option<f64>,
    /// Frame width, when the backend reports one
    pub frame_width: Option<u32>,
    /// Frame height, when the backend reports one
    pub frame_height: Option<u32>,
}

/// Raw ICE candidate-pair sample
#[derive(Debug, Clone)]
pub struct CandidatePairStats {
    /// Whether this pair carries the media
    pub nominated: bool,
    /// Most recent round-trip time in seconds
    pub current_round_trip_time_secs: Option<f64>,
}

/// Point-in-time raw sample pulled from the peer connection
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Sample time
    pub taken_at: DateTime<Utc>,
    /// Overall connection state at sample time
    pub connection_state: PeerConnectionState,
    /// ICE state at sample time
    pub ice_connection_state: IceConnectionState,
    /// Signaling state at sample time
    pub signaling_state: SignalingState,
    /// Inbound RTP entries
    pub inbound: Vec<RtpInboundStats>,
    /// Outbound RTP entries
    pub outbound: Vec<RtpOutboundStats>,
    /// Candidate-pair entries
    pub candidate_pairs: Vec<CandidatePairStats>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Derived quality of one direction of one track kind
#[derive(Debug, Clone, Serialize)]
pub struct StreamQuality {
    /// Payload bitrate over the last reporting interval, in kbit/s
    pub bitrate_kbps: f64,
    /// Cumulative packet loss percentage
    pub packet_loss_pct: f64,
    /// Interarrival jitter in milliseconds, when known
    pub jitter_ms: Option<f64>,
    /// Frame rate, when known
    pub frame_rate: Option<f64>,
    /// Resolution, when known
    pub resolution: Option<Resolution>,
}

/// Immutable point-in-time quality report
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// Sample time
    pub taken_at: DateTime<Utc>,
    /// Overall connection state
    pub connection_state: PeerConnectionState,
    /// ICE state
    pub ice_connection_state: IceConnectionState,
    /// Signaling state
    pub signaling_state: SignalingState,
    /// Received audio quality
    pub inbound_audio: Option<StreamQuality>,
    /// Received video quality
    pub inbound_video: Option<StreamQuality>,
    /// Sent audio quality
    pub outbound_audio: Option<StreamQuality>,
    /// Sent video quality
    pub outbound_video: Option<StreamQuality>,
    /// Round-trip time from the nominated candidate pair, in ms
    pub round_trip_time_ms: Option<f64>,
}

/// Receives each derived report
pub type StatsSink = Arc<dyn Fn(QualityReport) + Send + Sync>;

/// Shared slot naming the peer connection the collector should poll; the
/// engine repoints it when a session is rebuilt.
pub(crate) type PeerSlot = Arc<RwLock<Option<Arc<dyn PeerConnection>>>>;

/// Derive a report from the current snapshot and its predecessor.
///
/// Bitrates come from byte-counter deltas divided by the elapsed
/// reporting interval; with no predecessor they are zero. Loss is
/// `lost / (received_or_sent + lost) * 100` over cumulative counters.
pub fn derive_report(previous: Option<&StatsSnapshot>, current: &StatsSnapshot) -> QualityReport {
    let elapsed_secs = previous
        .map(|prev| {
            (current.taken_at - prev.taken_at).num_milliseconds() as f64 / 1000.0
        })
        .filter(|secs| *secs > 0.0);

    let inbound = |kind: MediaKind| -> Option<StreamQuality> {
        let entry = current.inbound.iter().find(|e| e.kind == kind)?;
        let prev_bytes = previous
            .and_then(|prev| prev.inbound.iter().find(|e| e.kind == kind))
            .map(|e| e.bytes_received);
        Some(StreamQuality {
            bitrate_kbps: bitrate_kbps(entry.bytes_received, prev_bytes, elapsed_secs),
            packet_loss_pct: loss_pct(entry.packets_received, entry.packets_lost),
            jitter_ms: Some(entry.jitter_secs * 1000.0),
            frame_rate: entry.frames_per_second,
            resolution: resolution(entry.frame_width, entry.frame_height),
        })
    };

    let outbound = |kind: MediaKind| -> Option<StreamQuality> {
        let entry = current.outbound.iter().find(|e| e.kind == kind)?;
        let prev_bytes = previous
            .and_then(|prev| prev.outbound.iter().find(|e| e.kind == kind))
            .map(|e| e.bytes_sent);
        Some(StreamQuality {
            bitrate_kbps: bitrate_kbps(entry.bytes_sent, prev_bytes, elapsed_secs),
            packet_loss_pct: loss_pct(entry.packets_sent, entry.remote_packets_lost.unwrap_or(0)),
            jitter_ms: None,
            frame_rate: entry.frames_per_second,
            resolution: resolution(entry.frame_width, entry.frame_height),
        })
    };

    let round_trip_time_ms = current
        .candidate_pairs
        .iter()
        .find(|pair| pair.nominated)
        .and_then(|pair| pair.current_round_trip_time_secs)
        .map(|secs| secs * 1000.0);

    QualityReport {
        taken_at: current.taken_at,
        connection_state: current.connection_state,
        ice_connection_state: current.ice_connection_state,
        signaling_state: current.signaling_state,
        inbound_audio: inbound(MediaKind::Audio),
        inbound_video: inbound(MediaKind::Video),
        outbound_audio: outbound(MediaKind::Audio),
        outbound_video: outbound(MediaKind::Video),
        round_trip_time_ms,
    }
}

fn bitrate_kbps(current_bytes: u64, previous_bytes: Option<u64>, elapsed_secs: Option<f64>) -> f64 {
    match (previous_bytes, elapsed_secs) {
        (Some(prev), Some(secs)) => {
            let delta = current_bytes.saturating_sub(prev);
            (delta as f64 * 8.0) / secs / 1000.0
        }
        _ => 0.0,
    }
}

fn loss_pct(delivered: u64, lost: i64) -> f64 {
    let lost = lost.max(0) as f64;
    let total = delivered as f64 + lost;
    if total == 0.0 {
        0.0
    } else {
        lost / total * 100.0
    }
}

fn resolution(width: Option<u32>, height: Option<u32>) -> Option<Resolution> {
    match (width, height) {
        (Some(width), Some(height)) => Some(Resolution { width, height }),
        _ => None,
    }
}

/// Interval poller delivering reports to a sink
pub(crate) struct StatsCollector {
    handle: JoinHandle<()>,
}

impl StatsCollector {
    /// Start polling the peer named by `slot` every `interval`
    pub(crate) fn start(slot: PeerSlot, sink: StatsSink, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval's first tick is immediate; skip it so the
            // first sample lands one full interval in.
            ticker.tick().await;

            let mut previous: Option<StatsSnapshot> = None;
            loop {
                ticker.tick().await;
                let peer = slot.read().clone();
                let Some(peer) = peer else {
                    debug!("stats: no active peer to sample");
                    continue;
                };
                match peer.stats_snapshot().await {
                    Ok(snapshot) => {
                        let report = derive_report(previous.as_ref(), &snapshot);
                        previous = Some(snapshot);
                        sink(report);
                    }
                    Err(e) => warn!("stats: failed to pull snapshot: {}", e),
                }
            }
        });
        Self { handle }
    }

    /// Stop polling and release the sink
    pub(crate) fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot_at(secs: i64) -> StatsSnapshot {
        StatsSnapshot {
            taken_at: Utc.timestamp_opt(secs, 0).unwrap(),
            connection_state: PeerConnectionState::Connected,
            ice_connection_state: IceConnectionState::Connected,
            signaling_state: SignalingState::Stable,
            inbound: Vec::new(),
            outbound: Vec::new(),
            candidate_pairs: Vec::new(),
        }
    }

    #[test]
    fn bitrate_from_byte_delta_over_elapsed_interval() {
        let mut first = snapshot_at(100);
        first.inbound.push(RtpInboundStats {
            kind: MediaKind::Video,
            bytes_received: 10_000,
            packets_received: 100,
            packets_lost: 0,
            jitter_secs: 0.0,
            frames_per_second: None,
            frame_width: None,
            frame_height: None,
        });

        let mut second = snapshot_at(102);
        second.inbound.push(RtpInboundStats {
            kind: MediaKind::Video,
            bytes_received: 60_000,
            packets_received: 200,
            packets_lost: 0,
            jitter_secs: 0.0,
            frames_per_second: Some(30.0),
            frame_width: Some(1280),
            frame_height: Some(720),
        });

        let report = derive_report(Some(&first), &second);
        let video = report.inbound_video.unwrap();
        // 50 000 bytes over 2 s = 200 kbit/s.
        assert!((video.bitrate_kbps - 200.0).abs() < f64::EPSILON);
        assert_eq!(
            video.resolution,
            Some(Resolution {
                width: 1280,
                height: 720
            })
        );
        assert_eq!(video.frame_rate, Some(30.0));
    }

    #[test]
    fn first_report_has_zero_bitrate() {
        let mut only = snapshot_at(100);
        only.inbound.push(RtpInboundStats {
            kind: MediaKind::Audio,
            bytes_received: 4_000,
            packets_received: 50,
            packets_lost: 0,
            jitter_secs: 0.012,
            frames_per_second: None,
            frame_width: None,
            frame_height: None,
        });

        let report = derive_report(None, &only);
        let audio = report.inbound_audio.unwrap();
        assert_eq!(audio.bitrate_kbps, 0.0);
        assert_eq!(audio.jitter_ms, Some(12.0));
    }

    #[test]
    fn loss_percentage_uses_lost_over_total() {
        let mut snapshot = snapshot_at(100);
        snapshot.inbound.push(RtpInboundStats {
            kind: MediaKind::Audio,
            bytes_received: 1_000,
            packets_received: 95,
            packets_lost: 5,
            jitter_secs: 0.0,
            frames_per_second: None,
            frame_width: None,
            frame_height: None,
        });
        snapshot.outbound.push(RtpOutboundStats {
            kind: MediaKind::Audio,
            bytes_sent: 1_000,
            packets_sent: 198,
            remote_packets_lost: Some(2),
            frames_per_second: None,
            frame_width: None,
            frame_height: None,
        });

        let report = derive_report(None, &snapshot);
        assert!((report.inbound_audio.unwrap().packet_loss_pct - 5.0).abs() < f64::EPSILON);
        assert!((report.outbound_audio.unwrap().packet_loss_pct - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rtt_comes_from_nominated_pair() {
        let mut snapshot = snapshot_at(100);
        snapshot.candidate_pairs.push(CandidatePairStats {
            nominated: false,
            current_round_trip_time_secs: Some(0.5),
        });
        snapshot.candidate_pairs.push(CandidatePairStats {
            nominated: true,
            current_round_trip_time_secs: Some(0.045),
        });

        let report = derive_report(None, &snapshot);
        assert_eq!(report.round_trip_time_ms, Some(45.0));
    }

    #[test]
    fn missing_directions_are_absent() {
        let report = derive_report(None, &snapshot_at(100));
        assert!(report.inbound_audio.is_none());
        assert!(report.outbound_video.is_none());
        assert!(report.round_trip_time_ms.is_none());
    }
}
