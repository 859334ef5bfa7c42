//! Payload stdout protocol scanner
//!
//! Payloads communicate exactly two structured responses through
//! stdout, at INIT time only: simulators report their PID and local
//! minimum step size, hubs report one connection record per MPI rank.
//! The responses are object literals embedded in arbitrary log noise.
//! This is a finite scanner over the text, not a general literal
//! evaluator: each literal is located by its `PID` key and bounded by
//! the enclosing braces; unknown keys are ignored.

use crate::error::{Error, Result};
use control_core::{HubEndpointRecord, SimulatorInit};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Marker substring a simulator's INIT response carries.
pub const SIMULATOR_MARKER: &str = "LOCAL_MINIMUM_STEP_SIZE";

/// Marker substring a hub's INIT response carries.
pub const HUB_MARKER: &str = "MPI_CONNECTION_INFO";

fn pid_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"['"]PID['"]"#).expect("static pattern"))
}

fn spike_detectors_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"['"]SPIKE_DETECTORS['"]\s*:\s*\[([^\]]*)\]"#).expect("static pattern")
    })
}

/// Slice out every `{...}` literal anchored on a `PID` key, in text
/// order.
fn pid_literals(text: &str) -> Vec<&str> {
    let mut literals = Vec::new();
    for found in pid_key_pattern().find_iter(text) {
        let Some(open) = text[..found.start()].rfind('{') else {
            continue;
        };
        let Some(close) = text[found.end()..].find('}') else {
            continue;
        };
        literals.push(&text[open + 1..found.end() + close]);
    }
    literals
}

/// Split one flat literal body into raw key/value pairs.
///
/// Values are integers, floats, quoted strings or bracketed lists;
/// nested braces do not occur by protocol.
fn scan_pairs(body: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let mut rest = body;
    loop {
        // key: next quoted token
        let Some(quote_start) = rest.find(['\'', '"']) else {
            break;
        };
        let quote = match rest[quote_start..].chars().next() {
            Some(c) => c,
            None => break,
        };
        let after_quote = &rest[quote_start + 1..];
        let Some(quote_end) = after_quote.find(quote) else {
            break;
        };
        let key = after_quote[..quote_end].to_string();
        let after_key = &after_quote[quote_end + 1..];
        let Some(colon) = after_key.find(':') else {
            break;
        };
        let value_text = after_key[colon + 1..].trim_start();

        // value: list, quoted string, or bare token
        let (value, consumed) = if let Some(stripped) = value_text.strip_prefix('[') {
            match stripped.find(']') {
                Some(end) => (stripped[..end].to_string(), end + 2),
                None => break,
            }
        } else if let Some(stripped) = value_text
            .strip_prefix('\'')
            .or_else(|| value_text.strip_prefix('"'))
        {
            let value_quote = match value_text.chars().next() {
                Some(c) => c,
                None => break,
            };
            match stripped.find(value_quote) {
                Some(end) => (stripped[..end].to_string(), end + 2),
                None => break,
            }
        } else {
            let end = value_text
                .find([',', '}'])
                .unwrap_or(value_text.len());
            (value_text[..end].trim().to_string(), end)
        };
        pairs.insert(key, value);
        rest = &value_text[consumed.min(value_text.len())..];
    }
    pairs
}

fn required<'a>(pairs: &'a HashMap<String, String>, key: &str, literal: &str) -> Result<&'a str> {
    pairs
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::ResponseParse(format!("missing {key} in {{{literal}}}")))
}

fn parse_pid(pairs: &HashMap<String, String>, literal: &str) -> Result<u32> {
    let raw = required(pairs, "PID", literal)?;
    raw.trim()
        .parse()
        .map_err(|_| Error::ResponseParse(format!("bad PID {raw:?}")))
}

/// Parse a simulator's INIT response out of accumulated stdout text.
///
/// The step size comes from the literal carrying the marker key; spike
/// detector ids may sit in the same or any other literal.
pub fn parse_simulator_init(text: &str) -> Result<SimulatorInit> {
    let literal = pid_literals(text)
        .into_iter()
        .find(|body| body.contains(SIMULATOR_MARKER))
        .ok_or_else(|| Error::ResponseParse("no step-size literal found".to_string()))?;
    let pairs = scan_pairs(literal);
    let pid = parse_pid(&pairs, literal)?;
    let raw_step = required(&pairs, SIMULATOR_MARKER, literal)?;
    let local_minimum_step_size: f64 = raw_step
        .trim()
        .parse()
        .map_err(|_| Error::ResponseParse(format!("bad step size {raw_step:?}")))?;

    let spike_detectors = match spike_detectors_pattern().captures(text) {
        None => None,
        Some(captures) => {
            let list = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let ids = list
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| {
                    entry
                        .parse::<u64>()
                        .map_err(|_| Error::ResponseParse(format!("bad spike detector id {entry:?}")))
                })
                .collect::<Result<Vec<u64>>>()?;
            Some(ids)
        }
    };

    Ok(SimulatorInit {
        pid,
        local_minimum_step_size,
        spike_detectors,
    })
}

/// Parse every hub endpoint record out of accumulated stdout text, in
/// text order.
pub fn parse_hub_records(text: &str) -> Result<Vec<HubEndpointRecord>> {
    let literals = pid_literals(text);
    let mut records = Vec::new();
    for literal in literals {
        if !literal.contains(HUB_MARKER) {
            continue;
        }
        let pairs = scan_pairs(literal);
        let pid = parse_pid(&pairs, literal)?;
        let direction = required(&pairs, "DATA_EXCHANGE_DIRECTION", literal)?
            .parse()
            .map_err(|e| Error::ResponseParse(format!("{e}")))?;
        let intercomm = required(&pairs, "INTERCOMM_TYPE", literal)?
            .parse()
            .map_err(|e| Error::ResponseParse(format!("{e}")))?;
        let connection_info = required(&pairs, HUB_MARKER, literal)?.to_string();
        records.push(HubEndpointRecord {
            pid,
            direction,
            intercomm,
            connection_info,
        });
    }
    if records.is_empty() {
        return Err(Error::ResponseParse(
            "no hub endpoint literal found".to_string(),
        ));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_core::{ExchangeDirection, IntercommRole};

    #[test]
    fn simulator_literal_amid_log_noise() {
        let text = "[INFO] booting\nstep sizes ready {'PID': 4711, 'LOCAL_MINIMUM_STEP_SIZE': 0.1} done\n";
        let init = parse_simulator_init(text).unwrap();
        assert_eq!(init.pid, 4711);
        assert_eq!(init.local_minimum_step_size, 0.1);
        assert_eq!(init.spike_detectors, None);
    }

    #[test]
    fn simulator_literal_with_spike_detectors() {
        let text =
            "{'PID': 4712, 'LOCAL_MINIMUM_STEP_SIZE': 0.25, 'SPIKE_DETECTORS': [7, 11, 13]}";
        let init = parse_simulator_init(text).unwrap();
        assert_eq!(init.pid, 4712);
        assert_eq!(init.local_minimum_step_size, 0.25);
        assert_eq!(init.spike_detectors, Some(vec![7, 11, 13]));
    }

    #[test]
    fn spike_detectors_in_a_separate_literal() {
        let text = "{'PID': 4712, 'LOCAL_MINIMUM_STEP_SIZE': 0.25}\n\
                    {'PID': 4712, 'SPIKE_DETECTORS': [42]}";
        let init = parse_simulator_init(text).unwrap();
        assert_eq!(init.spike_detectors, Some(vec![42]));
    }

    #[test]
    fn hub_records_survive_surrounding_junk() {
        let text = "junk before {'PID': 9, 'DATA_EXCHANGE_DIRECTION': 'A_TO_B', \
                    'MPI_CONNECTION_INFO': 'x', 'INTERCOMM_TYPE': 'sender'} junk between \
                    {'PID': 10, 'DATA_EXCHANGE_DIRECTION': 'B_TO_A', \
                    'MPI_CONNECTION_INFO': 'y', 'INTERCOMM_TYPE': 'receiver'} tail";
        let records = parse_hub_records(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pid, 9);
        assert_eq!(records[0].direction, ExchangeDirection::AToB);
        assert_eq!(records[0].intercomm, IntercommRole::Sender);
        assert_eq!(records[0].connection_info, "x");
        assert_eq!(records[1].pid, 10);
        assert_eq!(records[1].direction, ExchangeDirection::BToA);
        assert_eq!(records[1].intercomm, IntercommRole::Receiver);
        assert_eq!(records[1].connection_info, "y");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = "{'PID': 5, 'WHATEVER': 'noise', 'LOCAL_MINIMUM_STEP_SIZE': 1.5}";
        let init = parse_simulator_init(text).unwrap();
        assert_eq!(init.pid, 5);
        assert_eq!(init.local_minimum_step_size, 1.5);
    }

    #[test]
    fn missing_step_size_is_a_parse_error() {
        let text = "{'PID': 5}";
        assert!(parse_simulator_init(text).is_err());
    }

    #[test]
    fn stderr_noise_without_literals_is_a_parse_error() {
        assert!(parse_simulator_init("nothing structured here").is_err());
        assert!(parse_hub_records("nothing structured here").is_err());
    }

    #[test]
    fn malformed_direction_is_a_parse_error() {
        let text = "{'PID': 9, 'DATA_EXCHANGE_DIRECTION': 'SIDEWAYS', \
                    'MPI_CONNECTION_INFO': 'x', 'INTERCOMM_TYPE': 'sender'}";
        assert!(parse_hub_records(text).is_err());
    }
}
