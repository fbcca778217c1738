//! Wrapping expressions in template delimiters and confirming them

use crate::models::{Atom, DelimiterStyle};
use crate::oracle::classifier::ProbePurpose;
use crate::oracle::{FilterOracle, Settlement};
use tracing::{debug, info};

pub struct PayloadAssembler<'a> {
    oracle: &'a FilterOracle,
}

impl<'a> PayloadAssembler<'a> {
    pub fn new(oracle: &'a FilterOracle) -> Self {
        Self { oracle }
    }

    /// First delimiter style the filter lets through
    pub async fn delimiter(&self) -> Option<DelimiterStyle> {
        for style in DelimiterStyle::ALL {
            if self.oracle.is_allowed(&Atom::Delimiter(style)).await {
                debug!("Using delimiter {}", style.carrier());
                return Some(style);
            }
        }
        None
    }

    pub fn wrap(&self, style: DelimiterStyle, expression: &str) -> String {
        style.wrap(expression)
    }

    /// Sends the final payload built from `expression`; only an accepted
    /// confirmation counts, and a page that echoes the expression back
    /// has not evaluated it
    pub async fn confirm(&self, payload: &str, expression: &str, expects: Option<&str>) -> Settlement {
        let purpose = ProbePurpose::Confirmation {
            source: expression,
            expects,
        };
        let settlement = self.oracle.settle(payload, purpose).await;
        info!("Confirmation of {payload:?}: {settlement:?}");
        settlement
    }
}
