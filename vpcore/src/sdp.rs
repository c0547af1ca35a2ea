//! Session description rewriting applied to the local offer before it is set.
//!
//! The transform is a pure string function: the same input always yields the
//! same output, and applying it twice is the same as applying it once.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static OPUS_RTPMAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^a=rtpmap:(\d+) opus/48000(?:/\d+)?\s*$").expect("valid rtpmap regex")
});

static FMTP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^a=fmtp:(\d+) (.*)$").expect("valid fmtp regex"));

/// Opus parameters negotiated for the voice path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusParams {
    /// In-band forward error correction (`useinbandfec`).
    pub inband_fec: bool,
    /// Stereo send/receive (`stereo`, `sprop-stereo`).
    pub stereo: bool,
    /// Target average bitrate in bits per second (`maxaveragebitrate`).
    pub max_average_bitrate: u32,
}

impl Default for OpusParams {
    fn default() -> Self {
        Self {
            inband_fec: true,
            stereo: false,
            max_average_bitrate: 24_000,
        }
    }
}

impl OpusParams {
    fn overrides(&self) -> [(&'static str, String); 4] {
        let flag = |b: bool| if b { "1" } else { "0" }.to_string();
        [
            ("useinbandfec", flag(self.inband_fec)),
            ("stereo", flag(self.stereo)),
            ("sprop-stereo", flag(self.stereo)),
            ("maxaveragebitrate", self.max_average_bitrate.to_string()),
        ]
    }
}

/// Payload types mapped to Opus by `a=rtpmap` lines.
pub fn opus_payload_types(sdp: &str) -> BTreeSet<u8> {
    sdp.lines()
        .filter_map(|line| OPUS_RTPMAP.captures(line.trim_end_matches('\r')))
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

/// Rewrites every Opus `a=fmtp` line with `params`, inserting one after the
/// `a=rtpmap` line when a payload type has none. Line endings and all other
/// lines are preserved. An SDP without Opus is returned unchanged.
pub fn normalize_opus(sdp: &str, params: &OpusParams) -> String {
    let opus = opus_payload_types(sdp);
    if opus.is_empty() {
        return sdp.to_string();
    }

    let eol = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let lines: Vec<&str> = sdp.split('\n').map(|l| l.trim_end_matches('\r')).collect();

    let with_fmtp: BTreeSet<u8> = lines
        .iter()
        .filter_map(|line| FMTP.captures(line))
        .filter_map(|caps| caps[1].parse::<u8>().ok())
        .filter(|pt| opus.contains(pt))
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + opus.len());
    for line in lines {
        if let Some(caps) = FMTP.captures(line)
            && let Ok(pt) = caps[1].parse::<u8>()
            && opus.contains(&pt)
        {
            out.push(format!("a=fmtp:{pt} {}", rewrite_fmtp_params(&caps[2], params)));
            continue;
        }

        out.push(line.to_string());

        if let Some(caps) = OPUS_RTPMAP.captures(line)
            && let Ok(pt) = caps[1].parse::<u8>()
            && !with_fmtp.contains(&pt)
        {
            out.push(format!("a=fmtp:{pt} {}", rewrite_fmtp_params("", params)));
        }
    }

    out.join(eol)
}

fn rewrite_fmtp_params(existing: &str, params: &OpusParams) -> String {
    let mut pairs: Vec<(String, String)> = existing
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect();

    for (key, value) in params.overrides() {
        match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(pair) => pair.1 = value,
            None => pairs.push((key.to_string(), value)),
        }
    }

    pairs
        .into_iter()
        .map(|(k, v)| if v.is_empty() { k } else { format!("{k}={v}") })
        .collect::<Vec<_>>()
        .join(";")
}
