//! FHIR compartment definitions and membership checks.
//!
//! A compartment groups the resources associated with one principal
//! instance. `Observation` belongs to `Patient/123` when its `subject` or
//! `performer` references that patient.
//!
//! # Standard Compartments
//!
//! - **Patient**: <https://hl7.org/fhir/R4/compartmentdefinition-patient.html>
//! - **Encounter**: <https://hl7.org/fhir/R4/compartmentdefinition-encounter.html>
//! - **Practitioner**: <https://hl7.org/fhir/R4/compartmentdefinition-practitioner.html>
//!
//! # Usage
//!
//! ```
//! use octofhir_smart_auth::compartment::CompartmentChecker;
//!
//! let checker = CompartmentChecker::new();
//!
//! let observation = serde_json::json!({
//!     "resourceType": "Observation",
//!     "subject": {"reference": "Patient/123"}
//! });
//!
//! assert!(checker.is_in_compartment("Patient", "123", &observation));
//! ```

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Marker parameter for the compartment's own resource type.
const SELF_REFERENCE: &str = "{def}";

// Inclusions are written `param` or `param:field` when the element name
// differs from the search parameter.
const PATIENT_COMPARTMENT: &[(&str, &[&str])] = &[
    ("Patient", &[SELF_REFERENCE]),
    ("Account", &["subject"]),
    ("AllergyIntolerance", &["patient", "recorder", "asserter"]),
    ("Appointment", &["actor:participant"]),
    ("AppointmentResponse", &["actor"]),
    ("AuditEvent", &["patient:entity"]),
    ("Basic", &["patient:subject", "author"]),
    ("BodyStructure", &["patient"]),
    ("CarePlan", &["patient:subject", "performer:activity"]),
    ("CareTeam", &["patient:subject", "participant"]),
    ("ChargeItem", &["subject", "enterer", "performer-actor:performer"]),
    ("Claim", &["patient", "payee"]),
    ("ClaimResponse", &["patient"]),
    ("ClinicalImpression", &["subject"]),
    ("Communication", &["subject", "sender", "recipient"]),
    ("CommunicationRequest", &["subject", "sender", "recipient", "requester"]),
    ("Composition", &["subject", "author", "attester"]),
    ("Condition", &["patient:subject", "asserter"]),
    ("Consent", &["patient"]),
    ("Coverage", &["policy-holder:policyHolder", "subscriber", "beneficiary", "payor"]),
    ("DetectedIssue", &["patient"]),
    ("DeviceRequest", &["subject", "performer"]),
    ("DeviceUseStatement", &["subject"]),
    ("DiagnosticReport", &["subject"]),
    ("DocumentManifest", &["subject", "author", "recipient"]),
    ("DocumentReference", &["subject", "author"]),
    ("Encounter", &["patient:subject"]),
    ("EnrollmentRequest", &["subject:candidate"]),
    ("EpisodeOfCare", &["patient"]),
    ("ExplanationOfBenefit", &["patient", "payee"]),
    ("FamilyMemberHistory", &["patient"]),
    ("Flag", &["patient:subject"]),
    ("Goal", &["patient:subject"]),
    ("Group", &["member"]),
    ("ImagingStudy", &["patient:subject"]),
    ("Immunization", &["patient"]),
    ("ImmunizationEvaluation", &["patient"]),
    ("ImmunizationRecommendation", &["patient"]),
    ("Invoice", &["subject", "patient:subject", "recipient"]),
    ("List", &["subject", "source"]),
    ("MeasureReport", &["patient:subject"]),
    ("Media", &["subject"]),
    ("MedicationAdministration", &["patient:subject", "performer", "subject"]),
    ("MedicationDispense", &["subject", "patient:subject", "receiver", "performer"]),
    ("MedicationRequest", &["subject"]),
    ("MedicationStatement", &["subject", "source:informationSource"]),
    ("MolecularSequence", &["patient"]),
    ("NutritionOrder", &["patient"]),
    ("Observation", &["subject", "performer"]),
    ("Procedure", &["patient:subject", "performer"]),
    ("Provenance", &["patient:target"]),
    ("QuestionnaireResponse", &["subject", "author", "source"]),
    ("RelatedPerson", &["patient"]),
    ("RequestGroup", &["subject", "participant"]),
    ("ResearchSubject", &["individual"]),
    ("RiskAssessment", &["subject"]),
    ("Schedule", &["actor"]),
    ("ServiceRequest", &["subject", "performer"]),
    ("Specimen", &["subject"]),
    ("SupplyDelivery", &["patient"]),
    ("SupplyRequest", &["subject:requester"]),
    ("VisionPrescription", &["patient"]),
];

const ENCOUNTER_COMPARTMENT: &[(&str, &[&str])] = &[
    ("Encounter", &[SELF_REFERENCE]),
    ("CarePlan", &["encounter"]),
    ("CareTeam", &["encounter"]),
    ("ChargeItem", &["context"]),
    ("Claim", &["encounter"]),
    ("ClinicalImpression", &["encounter"]),
    ("Communication", &["encounter"]),
    ("CommunicationRequest", &["encounter"]),
    ("Composition", &["encounter"]),
    ("Condition", &["encounter"]),
    ("DeviceRequest", &["encounter"]),
    ("DiagnosticReport", &["encounter"]),
    ("DocumentManifest", &["related-ref:related"]),
    ("DocumentReference", &["encounter:context"]),
    ("ExplanationOfBenefit", &["encounter"]),
    ("List", &["encounter"]),
    ("Media", &["encounter"]),
    ("MedicationAdministration", &["context"]),
    ("MedicationRequest", &["encounter"]),
    ("NutritionOrder", &["encounter"]),
    ("Observation", &["encounter"]),
    ("Procedure", &["encounter"]),
    ("QuestionnaireResponse", &["encounter"]),
    ("RequestGroup", &["encounter"]),
    ("RiskAssessment", &["encounter"]),
    ("ServiceRequest", &["encounter"]),
    ("VisionPrescription", &["encounter"]),
];

const PRACTITIONER_COMPARTMENT: &[(&str, &[&str])] = &[
    ("Practitioner", &[SELF_REFERENCE]),
    ("Account", &["subject"]),
    ("Appointment", &["actor:participant"]),
    ("AppointmentResponse", &["actor"]),
    ("AuditEvent", &["agent"]),
    ("CarePlan", &["performer:activity"]),
    ("CareTeam", &["participant"]),
    ("Claim", &["enterer", "provider", "payee", "care-team:careTeam"]),
    ("Communication", &["sender", "recipient"]),
    ("CommunicationRequest", &["sender", "recipient", "requester"]),
    ("Composition", &["subject", "author", "attester"]),
    ("Condition", &["asserter"]),
    ("DiagnosticReport", &["performer"]),
    ("DocumentManifest", &["subject", "author", "recipient"]),
    ("DocumentReference", &["subject", "author", "authenticator"]),
    ("Encounter", &["practitioner:participant", "participant"]),
    ("EpisodeOfCare", &["care-manager:careManager"]),
    ("ExplanationOfBenefit", &["enterer", "provider", "payee", "care-team:careTeam"]),
    ("Flag", &["author"]),
    ("Group", &["member", "managing-entity:managingEntity"]),
    ("ImagingStudy", &["performer:series"]),
    ("Immunization", &["performer"]),
    ("List", &["source"]),
    ("MeasureReport", &["reporter"]),
    ("Media", &["subject", "operator"]),
    ("MedicationAdministration", &["performer"]),
    ("MedicationDispense", &["performer", "receiver"]),
    ("MedicationRequest", &["requester"]),
    ("MedicationStatement", &["source:informationSource"]),
    ("Observation", &["performer"]),
    ("Procedure", &["performer"]),
    ("Provenance", &["agent"]),
    ("QuestionnaireResponse", &["author", "source"]),
    ("Schedule", &["actor"]),
    ("ServiceRequest", &["performer", "requester"]),
    ("Slot", &["schedule"]),
    ("SupplyRequest", &["requester"]),
    ("Task", &["owner", "requester"]),
];

// =============================================================================
// Compartment Definition
// =============================================================================

/// How a resource is included in a compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompartmentInclusion {
    /// Search parameter that links to the compartment.
    pub param: String,

    /// Element holding the reference when it differs from `param`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl CompartmentInclusion {
    fn parse(entry: &str) -> Self {
        match entry.split_once(':') {
            Some((param, field)) => Self {
                param: param.to_string(),
                field: Some(field.to_string()),
            },
            None => Self {
                param: entry.to_string(),
                field: None,
            },
        }
    }

    /// The element to read the reference from.
    #[must_use]
    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.param)
    }

    fn is_self_reference(&self) -> bool {
        self.param == SELF_REFERENCE
    }
}

/// FHIR compartment definition.
#[derive(Debug, Clone)]
pub struct CompartmentDefinition {
    /// Compartment type (e.g. `Patient`).
    pub code: String,

    resources: HashMap<String, Vec<CompartmentInclusion>>,
}

impl CompartmentDefinition {
    fn from_table(code: &str, table: &[(&str, &[&str])]) -> Self {
        let resources = table
            .iter()
            .map(|(resource_type, inclusions)| {
                (
                    (*resource_type).to_string(),
                    inclusions.iter().map(|s| CompartmentInclusion::parse(s)).collect(),
                )
            })
            .collect();

        Self {
            code: code.to_string(),
            resources,
        }
    }

    /// The standard Patient compartment.
    #[must_use]
    pub fn patient() -> Self {
        Self::from_table("Patient", PATIENT_COMPARTMENT)
    }

    /// The standard Encounter compartment.
    #[must_use]
    pub fn encounter() -> Self {
        Self::from_table("Encounter", ENCOUNTER_COMPARTMENT)
    }

    /// The standard Practitioner compartment.
    #[must_use]
    pub fn practitioner() -> Self {
        Self::from_table("Practitioner", PRACTITIONER_COMPARTMENT)
    }

    /// Looks up a standard definition by compartment type, case-insensitively.
    #[must_use]
    pub fn standard(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "patient" => Some(Self::patient()),
            "encounter" => Some(Self::encounter()),
            "practitioner" => Some(Self::practitioner()),
            _ => None,
        }
    }

    /// Check if a resource type is included in this compartment.
    #[must_use]
    pub fn includes_resource_type(&self, resource_type: &str) -> bool {
        self.resources.contains_key(resource_type)
    }

    /// Get inclusion criteria for a resource type.
    #[must_use]
    pub fn get_inclusions(&self, resource_type: &str) -> Option<&[CompartmentInclusion]> {
        self.resources.get(resource_type).map(Vec::as_slice)
    }

    /// All member resource types, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.resources.keys().cloned().collect();
        types.sort();
        types
    }
}

// =============================================================================
// Compartment Checker
// =============================================================================

/// Checks whether concrete resources belong to a compartment instance.
#[derive(Debug, Clone)]
pub struct CompartmentChecker {
    definitions: HashMap<String, CompartmentDefinition>,
}

impl Default for CompartmentChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompartmentChecker {
    /// Create a checker with the standard definitions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_definitions([
            CompartmentDefinition::patient(),
            CompartmentDefinition::encounter(),
            CompartmentDefinition::practitioner(),
        ])
    }

    /// Create a checker over the given definitions.
    #[must_use]
    pub fn with_definitions(definitions: impl IntoIterator<Item = CompartmentDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.code.clone(), d))
                .collect(),
        }
    }

    /// The definition for a compartment type.
    #[must_use]
    pub fn definition(&self, compartment_type: &str) -> Option<&CompartmentDefinition> {
        self.definitions.get(compartment_type)
    }

    /// Check if a resource is in the given compartment instance.
    #[must_use]
    pub fn is_in_compartment(
        &self,
        compartment_type: &str,
        compartment_id: &str,
        resource: &Value,
    ) -> bool {
        let Some(definition) = self.definition(compartment_type) else {
            return false;
        };

        let resource_type = resource["resourceType"].as_str().unwrap_or("");
        let Some(inclusions) = definition.get_inclusions(resource_type) else {
            return false;
        };

        // The compartment resource itself
        if resource_type == compartment_type {
            return resource["id"].as_str() == Some(compartment_id);
        }

        let expected = format!("{}/{}", compartment_type, compartment_id);
        inclusions
            .iter()
            .filter(|i| !i.is_self_reference())
            .any(|inclusion| {
                let mut refs = Vec::new();
                if let Some(value) = resource.get(inclusion.field()) {
                    collect_references(value, &mut refs);
                }
                refs.iter().any(|r| reference_matches(r, &expected))
            })
    }

    /// Search parameters restricting `resource_type` to a compartment instance.
    ///
    /// Returns `(param, "Type/id")` pairs, or `None` if the type is not a
    /// member (or is the compartment type itself).
    #[must_use]
    pub fn search_params(
        &self,
        compartment_type: &str,
        compartment_id: &str,
        resource_type: &str,
    ) -> Option<Vec<(String, String)>> {
        let inclusions = self
            .definition(compartment_type)?
            .get_inclusions(resource_type)?;

        let value = format!("{}/{}", compartment_type, compartment_id);
        let params: Vec<(String, String)> = inclusions
            .iter()
            .filter(|i| !i.is_self_reference())
            .map(|i| (i.param.clone(), value.clone()))
            .collect();

        if params.is_empty() { None } else { Some(params) }
    }

    /// Check if a resource type belongs to a compartment definition.
    #[must_use]
    pub fn is_resource_in_compartment_definition(
        &self,
        compartment_type: &str,
        resource_type: &str,
    ) -> bool {
        self.definition(compartment_type)
            .is_some_and(|d| d.includes_resource_type(resource_type))
    }
}

/// Collect reference strings from a value (string, Reference, array, or
/// backbone element such as `participant.actor`).
fn collect_references(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::String(s) => refs.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_references(item, refs);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("reference") {
                refs.push(s.clone());
                return;
            }
            for key in ["actor", "individual", "member", "entity", "what", "who", "party"] {
                if let Some(nested) = map.get(key) {
                    collect_references(nested, refs);
                }
            }
        }
        _ => {}
    }
}

/// `Patient/123`, `Patient/123/_history/2` and absolute URLs ending in
/// `/Patient/123` all match `Patient/123`.
fn reference_matches(reference: &str, expected: &str) -> bool {
    let reference = reference
        .split_once("/_history/")
        .map_or(reference, |(base, _)| base);
    reference == expected || reference.ends_with(&format!("/{expected}"))
}

// =============================================================================
// Tests
// =============================================================================
