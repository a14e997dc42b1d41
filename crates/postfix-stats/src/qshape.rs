// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `qshape` output parsing and the older-than inversion.
//!
//! `qshape` reports how many messages sit in each age bucket:
//!
//! ```text
//!                                T  5 10 20 40 80 160 320 640 1280 2560 5120 5120+
//!                         TOTAL  4  0  0  0  2  0   2   0   0    0    0    0     0
//!                   example.com  6  0  0  0  2  0   2   0   0    0    0    0     2
//! ```
//!
//! Each row is restated as the number of messages older than every bucket's lower bound, which
//! is what alerts are set on:
//!
//! ```text
//!                                T  5 10 20 40 80 160 320 640 1280 2560 5120
//!                         TOTAL  4  4  4  4  2  2   0   0   0    0    0    0
//!                   example.com  6  6  6  6  4  4   2   2   2    2    2    2
//! ```
//!
//! The inversion keeps all information. The unbounded last bucket is never reported because
//! nothing is older than it.

use crate::errors::QshapeParseError;
use crate::metric::MetricEvent;
use crate::util::metric_segment;

/// One parsed `qshape` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueShape {
    /// Bucket labels from the header, without the leading `T`.
    pub buckets: Vec<String>,
    pub rows: Vec<DomainRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRow {
    pub domain: String,
    pub total: i64,
    pub counts: Vec<i64>,
}

/// Parses `qshape` stdout. Blank lines are ignored; the first remaining line is the header.
pub fn parse_qshape(output: &str) -> Result<QueueShape, QshapeParseError> {
    let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());

    let header = lines.next().ok_or(QshapeParseError::Empty)?;
    let mut labels = header.split_whitespace();
    if labels.next() != Some("T") {
        return Err(QshapeParseError::BadHeader(header.to_string()));
    }
    let buckets: Vec<String> = labels.map(str::to_string).collect();
    if buckets.is_empty() {
        return Err(QshapeParseError::NoBuckets);
    }

    let rows = lines
        .map(|line| parse_row(line, buckets.len()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueueShape { buckets, rows })
}

fn parse_row(line: &str, bucket_count: usize) -> Result<DomainRow, QshapeParseError> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    let expected = bucket_count + 2;
    if columns.len() != expected {
        return Err(QshapeParseError::ColumnCount {
            row: line.to_string(),
            expected,
            found: columns.len(),
        });
    }

    // Counts are never negative and must fit the signed metric value
    let parse_count = |value: &str| {
        value
            .parse::<u64>()
            .ok()
            .and_then(|count| i64::try_from(count).ok())
            .ok_or_else(|| QshapeParseError::InvalidCount {
                row: line.to_string(),
                value: value.to_string(),
            })
    };

    let total = parse_count(columns[1])?;
    let counts: Vec<i64> = columns[2..]
        .iter()
        .map(|&value| parse_count(value))
        .collect::<Result<_, _>>()?;

    let sum = counts
        .iter()
        .try_fold(0i64, |sum, &count| sum.checked_add(count));
    if sum != Some(total) {
        return Err(QshapeParseError::TotalMismatch {
            row: line.to_string(),
            total,
        });
    }

    Ok(DomainRow {
        domain: columns[0].to_string(),
        total,
        counts,
    })
}

/// `R_i = total - (c_1 + ... + c_i)` for every bucket `i`, floored at zero.
///
/// ```
/// use postfix_stats::qshape::invert_buckets;
///
/// assert_eq!(invert_buckets(6, &[0, 3, 0, 2, 0, 1]), vec![6, 3, 3, 1, 1, 0]);
/// ```
pub fn invert_buckets(total: i64, counts: &[i64]) -> Vec<i64> {
    counts
        .iter()
        .scan(total, |remaining, count| {
            *remaining = remaining.saturating_sub(*count).max(0);
            Some(*remaining)
        })
        .collect()
}

/// Counter events for one queue: `qshape.<queue>.<domain>.sum` plus one older-than counter per
/// bounded bucket.
pub fn queue_metrics(queue: &str, shape: &QueueShape) -> Vec<MetricEvent> {
    let bounded = shape.buckets.len().saturating_sub(1);
    let mut events = Vec::with_capacity(shape.rows.len() * (bounded + 1));

    for row in &shape.rows {
        let domain = metric_segment(&row.domain.to_lowercase());
        events.push(MetricEvent::count(
            format!("qshape.{queue}.{domain}.sum"),
            row.total,
        ));

        let older_than = invert_buckets(row.total, &row.counts);
        for (label, remaining) in shape.buckets.iter().zip(older_than).take(bounded) {
            events.push(MetricEvent::count(
                format!("qshape.{queue}.{domain}.{label}"),
                remaining,
            ));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricValue;
    use proptest::prelude::*;

    const STATIC_QSHAPE: &str = "
                               T  5 10 20 40 80 160 320 640 1280 2560 5120 5120+
                        TOTAL  6  0  3  0  2  0   0   0   1    0    0    0     0
                  example.com  7  0  3  0  2  0   0   0   2    0    0    0     0
";

    fn value_of(events: &[MetricEvent], name: &str) -> Option<i64> {
        events.iter().find(|e| e.name == name).map(|e| match e.value {
            MetricValue::Count(delta) => delta,
            MetricValue::Timing(_) => panic!("{name} is a timer"),
        })
    }

    #[test]
    fn test_parse_static_output() {
        let shape = parse_qshape(STATIC_QSHAPE).unwrap();

        assert_eq!(shape.buckets.len(), 12);
        assert_eq!(shape.buckets[0], "5");
        assert_eq!(shape.buckets[11], "5120+");
        assert_eq!(
            shape.rows[0],
            DomainRow {
                domain: "TOTAL".to_string(),
                total: 6,
                counts: vec![0, 3, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0],
            }
        );
        assert_eq!(shape.rows[1].domain, "example.com");
    }

    #[test]
    fn test_queue_metrics_from_static_output() {
        let events = queue_metrics("active", &parse_qshape(STATIC_QSHAPE).unwrap());

        assert_eq!(value_of(&events, "qshape.active.total.sum"), Some(6));
        assert_eq!(value_of(&events, "qshape.active.total.5"), Some(6));
        assert_eq!(value_of(&events, "qshape.active.total.10"), Some(3));
        assert_eq!(value_of(&events, "qshape.active.total.20"), Some(3));
        assert_eq!(value_of(&events, "qshape.active.total.40"), Some(1));
        assert_eq!(value_of(&events, "qshape.active.total.5120"), Some(0));
        assert_eq!(value_of(&events, "qshape.active.total.5120+"), None);

        assert_eq!(value_of(&events, "qshape.active.example_com.sum"), Some(7));
        assert_eq!(value_of(&events, "qshape.active.example_com.10"), Some(4));
        assert_eq!(value_of(&events, "qshape.active.example_com.640"), Some(0));

        // sum plus 11 bounded buckets per row
        assert_eq!(events.len(), 24);
    }

    #[test]
    fn test_header_only_output_has_no_rows() {
        let shape = parse_qshape("T 5 10 5120+\n\n").unwrap();
        assert!(shape.rows.is_empty());
        assert!(queue_metrics("hold", &shape).is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_qshape(""), Err(QshapeParseError::Empty));
        assert_eq!(parse_qshape("  \n\n"), Err(QshapeParseError::Empty));
        assert_eq!(
            parse_qshape("X 5 10\nTOTAL 0 0 0"),
            Err(QshapeParseError::BadHeader("X 5 10".to_string()))
        );
        assert_eq!(parse_qshape("T\n"), Err(QshapeParseError::NoBuckets));
        assert_eq!(
            parse_qshape("T 5 10\nTOTAL 1 1"),
            Err(QshapeParseError::ColumnCount {
                row: "TOTAL 1 1".to_string(),
                expected: 4,
                found: 3,
            })
        );
        assert_eq!(
            parse_qshape("T 5 10\nTOTAL 1 one 0"),
            Err(QshapeParseError::InvalidCount {
                row: "TOTAL 1 one 0".to_string(),
                value: "one".to_string(),
            })
        );
    }

    #[test]
    fn test_negative_and_oversized_counts_are_rejected() {
        assert_eq!(
            parse_qshape("T 5 5+\nTOTAL -9223372036854775808 1 0\n"),
            Err(QshapeParseError::InvalidCount {
                row: "TOTAL -9223372036854775808 1 0".to_string(),
                value: "-9223372036854775808".to_string(),
            })
        );
        assert_eq!(
            parse_qshape("T 5 5+\nTOTAL 1 -1 2"),
            Err(QshapeParseError::InvalidCount {
                row: "TOTAL 1 -1 2".to_string(),
                value: "-1".to_string(),
            })
        );
        assert_eq!(
            parse_qshape("T 5 5+\nTOTAL 9223372036854775808 0 0"),
            Err(QshapeParseError::InvalidCount {
                row: "TOTAL 9223372036854775808 0 0".to_string(),
                value: "9223372036854775808".to_string(),
            })
        );
    }

    #[test]
    fn test_buckets_must_add_up_to_total() {
        assert_eq!(
            parse_qshape("T 5 5+\nTOTAL 3 1 1"),
            Err(QshapeParseError::TotalMismatch {
                row: "TOTAL 3 1 1".to_string(),
                total: 3,
            })
        );
        assert_eq!(
            parse_qshape("T 5 5+\nTOTAL 0 9223372036854775807 9223372036854775807"),
            Err(QshapeParseError::TotalMismatch {
                row: "TOTAL 0 9223372036854775807 9223372036854775807".to_string(),
                total: 0,
            })
        );
    }

    #[test]
    fn test_inversion_never_goes_below_zero() {
        assert_eq!(invert_buckets(1, &[i64::MAX, i64::MAX]), vec![0, 0]);
        assert_eq!(invert_buckets(i64::MIN, &[1]), vec![0]);
    }

    #[test]
    fn test_domain_is_lowercased_and_flattened() {
        let shape = parse_qshape("T 5 5+\nMail.Example.COM 2 1 1").unwrap();
        let events = queue_metrics("deferred", &shape);

        assert_eq!(
            events,
            vec![
                MetricEvent::count("qshape.deferred.mail_example_com.sum", 2),
                MetricEvent::count("qshape.deferred.mail_example_com.5", 1),
            ]
        );
    }

    fn bucket_counts() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(0i64..10_000, 1..16)
    }

    proptest! {
        #[test]
        fn prop_inversion_is_monotone_and_ends_at_zero(counts in bucket_counts()) {
            let total: i64 = counts.iter().sum();
            let inverted = invert_buckets(total, &counts);

            prop_assert_eq!(inverted.len(), counts.len());
            prop_assert_eq!(inverted[0], total - counts[0]);
            prop_assert_eq!(inverted[inverted.len() - 1], 0);
            for pair in inverted.windows(2) {
                prop_assert!(pair[0] >= pair[1]);
            }
        }

        #[test]
        fn prop_inversion_is_reversible(counts in bucket_counts()) {
            let total: i64 = counts.iter().sum();
            let inverted = invert_buckets(total, &counts);

            let mut previous = total;
            let restored: Vec<i64> = inverted
                .iter()
                .map(|remaining| {
                    let count = previous - remaining;
                    previous = *remaining;
                    count
                })
                .collect();
            prop_assert_eq!(restored, counts);
        }
    }
}
