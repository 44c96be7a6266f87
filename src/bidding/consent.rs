use crate::bidding::types::{ConsentDecision, GdprConsent};

/// Normalizes the framework's consent object for one vendor.
///
/// Fail-open: `applies` only flips when the signal says so explicitly, and
/// `granted` stays true unless vendor data for `vendor_id` is present.
pub fn evaluate_consent(raw: Option<&GdprConsent>, vendor_id: &str) -> ConsentDecision {
    let mut decision = ConsentDecision {
        raw: raw.cloned(),
        ..ConsentDecision::default()
    };

    let Some(consent) = raw else {
        return decision;
    };

    if let Some(applies) = consent.gdpr_applies {
        decision.applies = applies;
    }

    if let Some(granted) = consent
        .vendor_data
        .as_ref()
        .and_then(|vendor_data| vendor_data.vendor_consents.get(vendor_id))
    {
        decision.granted = *granted;
    }

    if let Some(consent_string) = &consent.consent_string {
        decision.consent_string = consent_string.clone();
    }

    decision
}
