//! Session parameter set shared by the refresh and update paths

use serde::{Deserialize, Serialize};

/// Per-session race and hardware parameters.
///
/// The whole struct is replaced atomically under the session critical
/// section; individual fields are never mutated ambiently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Active race id
    pub raceid: i64,
    /// Serial port of the chip/tag reader
    pub port: String,
    /// Serial port of the barcode scanner
    pub scanner_port: String,
    /// Directory the results file is written to
    pub outputdir: String,
    /// Directory the reader process logs to
    pub logdir: String,
}

impl SessionParams {
    /// Form pairs for the `_setparams` POST, in the order the UI sent them
    pub fn form_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("raceid", self.raceid.to_string()),
            ("port", self.port.clone()),
            ("scanner_port", self.scanner_port.clone()),
            ("outputdir", self.outputdir.clone()),
            ("logdir", self.logdir.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_pairs_cover_all_fields() {
        let params = SessionParams {
            raceid: 7,
            port: "COM3".to_string(),
            scanner_port: "COM4".to_string(),
            outputdir: "/output_dir".to_string(),
            logdir: "/log_dir".to_string(),
        };
        let pairs = params.form_pairs();
        assert_eq!(pairs.len(), 5);
        assert!(pairs.contains(&("raceid", "7".to_string())));
        assert!(pairs.contains(&("scanner_port", "COM4".to_string())));
    }
}
