//! Wire shapes of the escrow service's responses.
//!
//! The submit endpoint answers with one of two shapes depending on the
//! transaction; both are parsed into [`SubmitOutcome`] here so callers never
//! probe optional fields.

use forgepay_core::Escrow;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::gateway::{SubmitOutcome, UnsignedTransaction};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnsignedTransactionResponse {
    #[serde(alias = "unsignedXdr")]
    unsigned_transaction: String,
}

impl From<UnsignedTransactionResponse> for UnsignedTransaction {
    fn from(resp: UnsignedTransactionResponse) -> Self {
        UnsignedTransaction {
            xdr: resp.unsigned_transaction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum SubmitStatus {
    Success,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum SubmitResponse {
    Deployed {
        status: SubmitStatus,
        #[serde(default)]
        message: String,
        #[serde(rename = "contractId")]
        contract_id: String,
        #[serde(default)]
        escrow: Option<Escrow>,
    },
    Plain {
        status: SubmitStatus,
        #[serde(default)]
        message: String,
    },
}

impl SubmitResponse {
    pub(crate) fn into_outcome(self) -> Result<SubmitOutcome, GatewayError> {
        match self {
            Self::Deployed {
                status: SubmitStatus::Failed,
                message,
                ..
            }
            | Self::Plain {
                status: SubmitStatus::Failed,
                message,
            } => Err(GatewayError::Rejected(message)),
            Self::Deployed {
                message,
                contract_id,
                escrow,
                ..
            } => Ok(SubmitOutcome::Deployed {
                contract_id,
                escrow,
                message,
            }),
            Self::Plain { message, .. } => Ok(SubmitOutcome::Applied { message }),
        }
    }
}

/// The read endpoint has answered with a wrapped object, a bare object, and
/// a one-element list across service versions.
///
/// Shapes are told apart by their keys rather than by trial parsing, so a
/// contract with one malformed field is a [`GatewayError::Json`] and never an
/// empty contract. A `{status, message}` body is the service refusing the read.
pub(crate) fn parse_escrow(value: Value) -> Result<Escrow, GatewayError> {
    match value {
        Value::Array(list) => {
            let first = list.into_iter().next().ok_or_else(|| {
                GatewayError::UnexpectedResponse("escrow list is empty".into())
            })?;
            contract(first)
        }
        Value::Object(mut map) => match map.remove("escrow") {
            Some(inner) => contract(inner),
            None => contract(Value::Object(map)),
        },
        other => Err(GatewayError::UnexpectedResponse(format!(
            "expected an escrow object, got {other}"
        ))),
    }
}

fn contract(value: Value) -> Result<Escrow, GatewayError> {
    let Value::Object(map) = &value else {
        return Err(GatewayError::UnexpectedResponse(format!(
            "expected an escrow object, got {value}"
        )));
    };
    if !map.contains_key("milestones") {
        if map.contains_key("status") {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("escrow read refused")
                .to_string();
            return Err(GatewayError::Rejected(message));
        }
        return Err(GatewayError::UnexpectedResponse(
            "escrow has no milestones field".into(),
        ));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(json: &str) -> Result<SubmitOutcome, GatewayError> {
        serde_json::from_str::<SubmitResponse>(json)
            .unwrap()
            .into_outcome()
    }

    #[test]
    fn deploy_submit_carries_contract_id() {
        let out = outcome(
            r#"{"status":"SUCCESS","message":"deployed","contractId":"CABC","escrow":{"title":"Site"}}"#,
        )
        .unwrap();
        match out {
            SubmitOutcome::Deployed {
                contract_id,
                escrow,
                message,
            } => {
                assert_eq!(contract_id, "CABC");
                assert_eq!(escrow.unwrap().title, "Site");
                assert_eq!(message, "deployed");
            }
            other => panic!("expected Deployed, got {other:?}"),
        }
    }

    #[test]
    fn plain_submit_is_applied() {
        let out = outcome(r#"{"status":"SUCCESS","message":"ok"}"#).unwrap();
        assert_eq!(
            out,
            SubmitOutcome::Applied {
                message: "ok".into()
            }
        );
    }

    #[test]
    fn failed_submit_is_rejected() {
        let err = outcome(r#"{"status":"FAILED","message":"tx_bad_auth"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(ref m) if m == "tx_bad_auth"));
    }

    #[test]
    fn unknown_status_does_not_parse() {
        assert!(serde_json::from_str::<SubmitResponse>(r#"{"status":"PENDING"}"#).is_err());
    }

    fn escrow(json: &str) -> Result<Escrow, GatewayError> {
        parse_escrow(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn escrow_read_shapes() {
        let wrapped = escrow(r#"{"escrow":{"title":"A","milestones":[]}}"#).unwrap();
        assert_eq!(wrapped.title, "A");

        let bare = escrow(r#"{"title":"B","milestones":[]}"#).unwrap();
        assert_eq!(bare.title, "B");

        let list = escrow(r#"[{"title":"C","milestones":[]}]"#).unwrap();
        assert_eq!(list.title, "C");

        assert!(matches!(
            escrow("[]"),
            Err(GatewayError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn malformed_wrapped_escrow_is_an_error_not_an_empty_contract() {
        let err = escrow(
            r#"{"escrow":{"title":"Site","milestones":[{"description":"Design"},{"description":"Build"}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Json(_)), "{err:?}");

        let bad_role = r#"{"escrow":{"title":"Site","milestones":[],"roles":{
            "approver":"GNOTAKEY","serviceProvider":"GNOTAKEY","platformAddress":"GNOTAKEY",
            "releaseSigner":"GNOTAKEY","disputeResolver":"GNOTAKEY"}}}"#;
        assert!(matches!(escrow(bad_role), Err(GatewayError::Json(_))));
    }

    #[test]
    fn status_body_is_rejected() {
        let err = escrow(r#"{"status":"FAILED","message":"Escrow not found"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(ref m) if m == "Escrow not found"));
    }

    #[test]
    fn object_without_milestones_is_unexpected() {
        assert!(matches!(
            escrow(r#"{"title":"B"}"#),
            Err(GatewayError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            escrow(r#"[{"title":"C"}]"#),
            Err(GatewayError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            escrow("42"),
            Err(GatewayError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn unsigned_xdr_alias() {
        let resp: UnsignedTransactionResponse =
            serde_json::from_str(r#"{"status":"SUCCESS","unsignedXdr":"AAAA"}"#).unwrap();
        assert_eq!(UnsignedTransaction::from(resp).xdr, "AAAA");
    }
}
