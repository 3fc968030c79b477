//! Strict parser for the scorer's `score,price1,...,priceN,rationale` reply.

use analysis_core::AnalysisError;
use thiserror::Error;

pub const MIN_SCORE: f64 = -5.0;
pub const MAX_SCORE: f64 = 5.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} comma-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {index} is not a number: '{value}'")]
    NotNumeric { index: usize, value: String },

    #[error("field {index} is not a finite positive price: {value}")]
    InvalidPrice { index: usize, value: f64 },

    #[error("score is not finite")]
    InvalidScore,

    #[error("rationale is empty")]
    EmptyRationale,
}

impl From<ParseError> for AnalysisError {
    fn from(err: ParseError) -> Self {
        AnalysisError::MalformedResponse(err.to_string())
    }
}

/// A validated scorer reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerReply {
    /// Clamped to `[MIN_SCORE, MAX_SCORE]`.
    pub score: f64,
    pub price_path: Vec<f64>,
    pub rationale: String,
}

/// Exactly `horizon + 2` fields are required, so the rationale cannot
/// contain commas. Every field is trimmed before conversion and the
/// rationale must not be blank.
pub fn parse_scorer_reply(raw: &str, horizon: usize) -> Result<ScorerReply, ParseError> {
    let fields: Vec<&str> = raw.trim().split(',').map(str::trim).collect();
    let expected = horizon + 2;
    if fields.len() != expected {
        return Err(ParseError::FieldCount {
            expected,
            found: fields.len(),
        });
    }

    let score = parse_number(0, fields[0])?;
    if !score.is_finite() {
        return Err(ParseError::InvalidScore);
    }

    let mut price_path = Vec::with_capacity(horizon);
    for (offset, field) in fields[1..=horizon].iter().enumerate() {
        let index = offset + 1;
        let price = parse_number(index, field)?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ParseError::InvalidPrice { index, value: price });
        }
        price_path.push(price);
    }

    let rationale = fields[expected - 1];
    if rationale.is_empty() {
        return Err(ParseError::EmptyRationale);
    }

    Ok(ScorerReply {
        score: score.clamp(MIN_SCORE, MAX_SCORE),
        price_path,
        rationale: rationale.to_string(),
    })
}

fn parse_number(index: usize, field: &str) -> Result<f64, ParseError> {
    field.parse::<f64>().map_err(|_| ParseError::NotNumeric {
        index,
        value: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_reply() {
        let reply = parse_scorer_reply(" 3, 101.5,102,102.75 ,103,104.2, earnings beat expectations \n", 5).unwrap();

        assert_eq!(reply.score, 3.0);
        assert_eq!(reply.price_path, vec![101.5, 102.0, 102.75, 103.0, 104.2]);
        assert_eq!(reply.rationale, "earnings beat expectations");
    }

    #[test]
    fn test_two_fields_rejected() {
        assert_eq!(
            parse_scorer_reply("abc,xyz", 5),
            Err(ParseError::FieldCount { expected: 7, found: 2 })
        );
    }

    #[test]
    fn test_extra_commas_rejected() {
        let err = parse_scorer_reply("1,2,3,4,5,6,strong, but volatile", 5).unwrap_err();
        assert_eq!(err, ParseError::FieldCount { expected: 7, found: 8 });
    }

    #[test]
    fn test_non_numeric_price() {
        let err = parse_scorer_reply("2,100,101,n/a,103,104,ok", 5).unwrap_err();
        assert_eq!(
            err,
            ParseError::NotNumeric {
                index: 3,
                value: "n/a".to_string()
            }
        );
    }

    #[test]
    fn test_non_finite_values_rejected() {
        assert!(matches!(
            parse_scorer_reply("NaN,100,101,102,103,104,ok", 5),
            Err(ParseError::InvalidScore)
        ));
        assert!(matches!(
            parse_scorer_reply("1,100,inf,102,103,104,ok", 5),
            Err(ParseError::InvalidPrice { index: 2, .. })
        ));
        assert!(matches!(
            parse_scorer_reply("1,100,-4,102,103,104,ok", 5),
            Err(ParseError::InvalidPrice { index: 2, .. })
        ));
    }

    #[test]
    fn test_blank_rationale_rejected() {
        assert_eq!(parse_scorer_reply("1,2,3,4,5,6,", 5), Err(ParseError::EmptyRationale));
        assert_eq!(parse_scorer_reply("1,2,3,4,5,6,   ", 5), Err(ParseError::EmptyRationale));
    }

    #[test]
    fn test_score_clamped() {
        assert_eq!(parse_scorer_reply("9,1,2,3,4,5,euphoric", 5).unwrap().score, MAX_SCORE);
        assert_eq!(parse_scorer_reply("-12.5,1,2,3,4,5,panic", 5).unwrap().score, MIN_SCORE);
    }

    #[test]
    fn test_horizon_drives_field_count() {
        let reply = parse_scorer_reply("-1,99,98,drifting lower", 2).unwrap();
        assert_eq!(reply.price_path.len(), 2);
        assert!(parse_scorer_reply("-1,99,98,drifting lower", 5).is_err());
    }

    #[test]
    fn test_maps_to_malformed_response() {
        let err: AnalysisError = ParseError::InvalidScore.into();
        assert_eq!(err.kind(), analysis_core::ErrorKind::MalformedResponse);
    }
}
