//! QR capacity-class selection for invoice payloads.
//!
//! BOLT11 invoices vary a lot in length (roughly 194 to 1223 characters), so
//! the QR type number has to be sized per payload. The table below holds the
//! byte-mode data capacities at error correction level L; selection picks the
//! first class whose capacity strictly exceeds the payload length and steps
//! up on encoder overflow instead of recursing.

use std::fmt;

use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode, Version};
use tracing::debug;

use crate::error::{Result, TipError};

/// (type number, byte-mode capacity at EC level L), ascending.
const CAPACITY_TABLE: [(i16, usize); 17] = [
    (9, 230),
    (10, 271),
    (11, 321),
    (12, 367),
    (13, 425),
    (14, 458),
    (15, 520),
    (16, 586),
    (17, 644),
    (18, 718),
    (19, 792),
    (20, 858),
    (21, 929),
    (22, 1003),
    (23, 1091),
    (24, 1171),
    (25, 1273),
];

/// Largest class we attempt when the table has no entry that fits.
const FALLBACK_CLASS: i16 = 26;

/// A scannable rendering of one invoice payload.
///
/// `capacity_class` is the QR type number the payload ended up in; `code` is
/// the handle the rendering collaborator turns into pixels or terminal cells.
#[derive(Clone)]
pub struct InvoiceCode {
    pub capacity_class: i16,
    pub code: QrCode,
}

impl fmt::Debug for InvoiceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvoiceCode")
            .field("capacity_class", &self.capacity_class)
            .field("width", &self.code.width())
            .finish()
    }
}

/// Encode `payload` into the smallest viable capacity class.
///
/// Deterministic for a given payload length and never truncates. Fails with
/// [`TipError::EncodingOverflow`] only when the fallback class overflows too;
/// the caller keeps the invoice usable as plain text in that case.
pub fn encode(payload: &str) -> Result<InvoiceCode> {
    let length = payload.len();
    let first = CAPACITY_TABLE
        .iter()
        .find(|(_, capacity)| length < *capacity)
        .map_or(FALLBACK_CLASS, |(class, _)| *class);

    for class in first..=FALLBACK_CLASS {
        match QrCode::with_version(payload, Version::Normal(class), EcLevel::L) {
            Ok(code) => {
                if class != first {
                    debug!(length, class, "payload overflowed its table class");
                }
                return Ok(InvoiceCode {
                    capacity_class: class,
                    code,
                });
            }
            Err(QrError::DataTooLong) => continue,
            Err(error) => {
                return Err(TipError::Internal(format!("qr construction failed: {error}")));
            }
        }
    }

    Err(TipError::EncodingOverflow { length })
}

#[cfg(test)]
mod tests {
    use super::{FALLBACK_CLASS, encode};

    #[test]
    fn selects_smallest_class_strictly_above_payload_length() {
        struct Case {
            name: &'static str,
            length: usize,
            expected_class: i16,
        }

        let cases = vec![
            Case {
                name: "empty payload",
                length: 0,
                expected_class: 9,
            },
            Case {
                name: "just below first capacity",
                length: 229,
                expected_class: 9,
            },
            Case {
                name: "exactly at first capacity moves up",
                length: 230,
                expected_class: 10,
            },
            Case {
                name: "mid table",
                length: 425,
                expected_class: 14,
            },
            Case {
                name: "longest known invoice",
                length: 1223,
                expected_class: 25,
            },
            Case {
                name: "just below table maximum",
                length: 1272,
                expected_class: 25,
            },
            Case {
                name: "beyond table maximum uses fallback",
                length: 1273,
                expected_class: FALLBACK_CLASS,
            },
        ];

        for case in cases {
            let payload = "x".repeat(case.length);
            let code = encode(&payload).expect(case.name);
            assert_eq!(
                code.capacity_class, case.expected_class,
                "{}: wrong class for length {}",
                case.name, case.length
            );
        }
    }

    #[test]
    fn encoding_is_deterministic_for_equal_lengths() {
        let first = encode(&"a".repeat(300)).expect("first encode");
        let second = encode(&"b".repeat(300)).expect("second encode");
        assert_eq!(first.capacity_class, second.capacity_class);
    }

    #[test]
    fn oversized_payload_reports_overflow() {
        let payload = "x".repeat(3000);
        let error = encode(&payload).expect_err("payload cannot fit any class");
        assert_eq!(error.kind(), "encoding_overflow");
    }
}
