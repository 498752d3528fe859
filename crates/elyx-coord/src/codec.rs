//! Wire-message codec.
//!
//! The formats are fixed for interop with legacy peers and must round-trip
//! bit-for-bit: records are `;`-separated, fields within a record
//! `,`-separated. Floats are printed with Rust's shortest round-trip
//! formatting, so encode then decode reproduces every value exactly.
//!
//! Kinds:
//!   `xUpdateMessage;<iter>;<unitId>,<periodIdx>,<x>,<production>;...`
//!   `dualUpdateMessage;<iter>;<unitId>,<periodIdx>,<u1>,<u2>,<u3>,<s1>,<s2>,<res1>,<res2>,<res3>,<y_IDLE>,<y_STARTING>,<y_PRODUCTION>,<y_STANDBY>;...`
//!   `convergenceReached`
//!   `iterationIncremented`

use elyx_core::{ElyxError, ElyxResult, PeriodIdx, UnitId};

use crate::store::{DualVector, ResidualTriple, SlackPair, StateVector};

const X_UPDATE_TAG: &str = "xUpdateMessage";
const DUAL_UPDATE_TAG: &str = "dualUpdateMessage";
const CONVERGENCE_TAG: &str = "convergenceReached";
const INCREMENT_TAG: &str = "iterationIncremented";

/// One (unit, period) entry of an x-update broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XUpdateRecord {
    pub unit: UnitId,
    pub period: PeriodIdx,
    pub x: f64,
    pub production: f64,
}

/// One (unit, period) entry of a dual-update broadcast: the new duals and
/// slacks, the residual snapshot, and the relaxed state indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualUpdateRecord {
    pub unit: UnitId,
    pub period: PeriodIdx,
    pub u: DualVector,
    pub s: SlackPair,
    pub residuals: ResidualTriple,
    pub y: StateVector,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    XUpdate {
        iteration: usize,
        records: Vec<XUpdateRecord>,
    },
    DualUpdate {
        iteration: usize,
        records: Vec<DualUpdateRecord>,
    },
    ConvergenceReached,
    IterationIncremented,
}

impl Message {
    pub fn encode(&self) -> String {
        match self {
            Message::XUpdate { iteration, records } => {
                let mut out = format!("{X_UPDATE_TAG};{iteration}");
                for r in records {
                    out.push_str(&format!(
                        ";{},{},{},{}",
                        r.unit.value(),
                        r.period.value(),
                        r.x,
                        r.production
                    ));
                }
                out
            }
            Message::DualUpdate { iteration, records } => {
                let mut out = format!("{DUAL_UPDATE_TAG};{iteration}");
                for r in records {
                    out.push_str(&format!(
                        ";{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                        r.unit.value(),
                        r.period.value(),
                        r.u.u1,
                        r.u.u2,
                        r.u.u3,
                        r.s.s1,
                        r.s.s2,
                        r.residuals.r1,
                        r.residuals.r2,
                        r.residuals.r3,
                        r.y.0[0],
                        r.y.0[1],
                        r.y.0[2],
                        r.y.0[3]
                    ));
                }
                out
            }
            Message::ConvergenceReached => CONVERGENCE_TAG.to_string(),
            Message::IterationIncremented => INCREMENT_TAG.to_string(),
        }
    }

    pub fn decode(payload: &str) -> ElyxResult<Message> {
        match payload {
            CONVERGENCE_TAG => return Ok(Message::ConvergenceReached),
            INCREMENT_TAG => return Ok(Message::IterationIncremented),
            _ => {}
        }

        let mut segments = payload.split(';');
        let tag = segments.next().unwrap_or_default();
        let iteration = parse_usize(segments.next(), "iteration")?;

        match tag {
            X_UPDATE_TAG => {
                let mut records = Vec::new();
                for seg in segments.filter(|s| !s.is_empty()) {
                    let f = split_fields(seg, 4)?;
                    records.push(XUpdateRecord {
                        unit: UnitId::new(parse_usize(Some(f[0]), "unitId")?),
                        period: PeriodIdx::new(parse_usize(Some(f[1]), "periodIdx")?),
                        x: parse_f64(f[2])?,
                        production: parse_f64(f[3])?,
                    });
                }
                Ok(Message::XUpdate { iteration, records })
            }
            DUAL_UPDATE_TAG => {
                let mut records = Vec::new();
                for seg in segments.filter(|s| !s.is_empty()) {
                    let f = split_fields(seg, 14)?;
                    records.push(DualUpdateRecord {
                        unit: UnitId::new(parse_usize(Some(f[0]), "unitId")?),
                        period: PeriodIdx::new(parse_usize(Some(f[1]), "periodIdx")?),
                        u: DualVector {
                            u1: parse_f64(f[2])?,
                            u2: parse_f64(f[3])?,
                            u3: parse_f64(f[4])?,
                        },
                        s: SlackPair {
                            s1: parse_f64(f[5])?,
                            s2: parse_f64(f[6])?,
                        },
                        residuals: ResidualTriple {
                            r1: parse_f64(f[7])?,
                            r2: parse_f64(f[8])?,
                            r3: parse_f64(f[9])?,
                        },
                        y: StateVector([
                            parse_f64(f[10])?,
                            parse_f64(f[11])?,
                            parse_f64(f[12])?,
                            parse_f64(f[13])?,
                        ]),
                    });
                }
                Ok(Message::DualUpdate { iteration, records })
            }
            other => Err(ElyxError::Protocol(format!(
                "unknown message kind '{other}'"
            ))),
        }
    }
}

fn split_fields(segment: &str, expected: usize) -> ElyxResult<Vec<&str>> {
    let fields: Vec<&str> = segment.split(',').collect();
    if fields.len() != expected {
        return Err(ElyxError::Protocol(format!(
            "record '{segment}' has {} fields, expected {expected}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn parse_usize(field: Option<&str>, name: &str) -> ElyxResult<usize> {
    field
        .ok_or_else(|| ElyxError::Protocol(format!("missing {name} field")))?
        .parse()
        .map_err(|_| ElyxError::Protocol(format!("malformed {name} field")))
}

fn parse_f64(field: &str) -> ElyxResult<f64> {
    field
        .parse()
        .map_err(|_| ElyxError::Protocol(format!("malformed float '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x_record(unit: usize, period: usize, x: f64, production: f64) -> XUpdateRecord {
        XUpdateRecord {
            unit: UnitId::new(unit),
            period: PeriodIdx::new(period),
            x,
            production,
        }
    }

    #[test]
    fn test_x_update_wire_shape() {
        let msg = Message::XUpdate {
            iteration: 3,
            records: vec![x_record(1, 2, 0.5, 0.4), x_record(7, 2, 0.25, 0.2)],
        };
        assert_eq!(
            msg.encode(),
            "xUpdateMessage;3;1,2,0.5,0.4;7,2,0.25,0.2"
        );
    }

    #[test]
    fn test_x_update_round_trip_exact() {
        // An awkward binary float must survive the round trip untouched.
        let msg = Message::XUpdate {
            iteration: 12,
            records: vec![x_record(3, 5, 0.1 + 0.2, 1.0 / 3.0)],
        };
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_dual_update_round_trip() {
        let msg = Message::DualUpdate {
            iteration: 4,
            records: vec![DualUpdateRecord {
                unit: UnitId::new(2),
                period: PeriodIdx::new(1),
                u: DualVector {
                    u1: -0.125,
                    u2: 0.75,
                    u3: 1e-7,
                },
                s: SlackPair { s1: 0.3, s2: 0.0 },
                residuals: ResidualTriple {
                    r1: 0.01,
                    r2: -0.02,
                    r3: 0.0,
                },
                y: StateVector([0.0, 0.0, 1.0, 0.0]),
            }],
        };
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_bare_literals() {
        assert_eq!(Message::ConvergenceReached.encode(), "convergenceReached");
        assert_eq!(
            Message::decode("convergenceReached").unwrap(),
            Message::ConvergenceReached
        );
        assert_eq!(
            Message::decode("iterationIncremented").unwrap(),
            Message::IterationIncremented
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::decode("yUpdateMessage;1;1,1,0.5,0.5").is_err());
        assert!(Message::decode("xUpdateMessage;nope;1,1,0.5,0.5").is_err());
        assert!(Message::decode("xUpdateMessage;1;1,1,0.5").is_err());
        assert!(Message::decode("").is_err());
    }

    #[test]
    fn test_empty_record_list() {
        let msg = Message::XUpdate {
            iteration: 0,
            records: vec![],
        };
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }
}
