//! Console formatting for the room client.

use hondacamera_shared::time::millis_to_rfc3339;

use crate::{photo::PhotoCandidate, room_socket::ReadyState, roster::RosterSnapshot};

const RULE: &str = "============================================================";

/// Formatter for what the CLI prints
pub struct PreviewFormatter;

impl PreviewFormatter {
    /// Format the current preview
    ///
    /// # Arguments
    ///
    /// * `preview` - The debounced preview, if any
    /// * `own_device_id` - This device's id (to mark as "me")
    pub fn format_preview(preview: Option<&PhotoCandidate>, own_device_id: &str) -> String {
        let Some(candidate) = preview else {
            return "\n[preview] (no photo yet)\n".to_string();
        };

        let me_suffix = if candidate.device_id == own_device_id {
            " (me)"
        } else {
            ""
        };
        let taken = candidate
            .captured_at
            .as_deref()
            .unwrap_or("unknown time");
        format!(
            "\n[preview] {}{} #{} {}\n          taken at {}\n",
            candidate.device_id, me_suffix, candidate.sequence, candidate.image_path, taken
        )
    }

    /// Format the room's role assignment
    pub fn format_roster(roster: &RosterSnapshot, own_device_id: &str) -> String {
        let mark = |device_id: &str| {
            if device_id == own_device_id {
                format!("{} (me)", device_id)
            } else {
                device_id.to_string()
            }
        };

        let mut output = String::new();
        output.push_str("\n\n");
        output.push_str(RULE);
        output.push_str("\nRoster:\n");
        match roster.recorder.as_deref() {
            Some(recorder) => output.push_str(&format!("recorder: {}\n", mark(recorder))),
            None => output.push_str("recorder: (none)\n"),
        }

        let mut shooters: Vec<&String> = roster.shooters.iter().collect();
        shooters.sort();
        if shooters.is_empty() {
            output.push_str("shooters: (none)\n");
        } else {
            for shooter in shooters {
                output.push_str(&format!("shooter:  {}\n", mark(shooter)));
            }
        }
        output.push_str(&format!(
            "counts: recorder={} shooter={}\n",
            roster.counts.recorder, roster.counts.shooter
        ));
        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format a capture request from another device
    ///
    /// `ts` is the sender's Unix timestamp in milliseconds.
    pub fn format_take_photo(origin_device_id: &str, ts: Option<f64>) -> String {
        let when = ts
            .filter(|ts| ts.is_finite())
            .and_then(|ts| millis_to_rfc3339(ts as i64))
            .unwrap_or_else(|| "unknown time".to_string());
        format!("\n! {} asked for a photo at {}\n", origin_device_id, when)
    }

    pub fn format_ready_state(state: ReadyState) -> String {
        format!("\n~ connection {}\n", state.as_str())
    }

    /// Format a loaded preview image
    pub fn format_image_loaded(object_url: &str, byte_count: usize) -> String {
        format!("\n<- {} ({} bytes)\n", object_url, byte_count)
    }
}
