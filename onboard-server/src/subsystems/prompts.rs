//! Prompt templates for the two LLM calls the core makes.

use onboard_core::models::DocumentType;

/// System instruction for field correction.
pub const EXTRACTION_SCHEMA_HINT: &str = "You are a document analysis assistant that extracts \
structured information from KYC/KYB documents. Return ONLY a JSON object of the form \
{\"fields\": {\"<field_name>\": {\"value\": \"<string>\", \"confidence\": <0.0-1.0>}}}. \
Use null for values you cannot read. Dates must be YYYY-MM-DD.";

/// System instruction for risk reasoning.
pub const REASONING_SCHEMA_HINT: &str = "You are a fraud and risk analysis expert. Evaluate the \
risk level of a user from their profile, extracted document data and third-party check results. \
Return ONLY a JSON object: {\"risk_status\": \"low|medium|high\", \"reasoning\": \"<detailed \
explanation>\", \"red_flags\": [\"...\"], \"discrepancies\": [\"...\"]}.";

fn field_guide(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Passport => {
            "- full_name: The full name of the passport holder\n\
             - passport_number: The passport number\n\
             - nationality: The nationality of the holder\n\
             - date_of_birth: The date of birth (YYYY-MM-DD)\n\
             - place_of_birth: The place of birth\n\
             - gender: The gender of the holder\n\
             - issue_date: When the passport was issued (YYYY-MM-DD)\n\
             - expiry_date: When the passport expires (YYYY-MM-DD)\n\
             - issuing_authority: The authority that issued the passport"
        }
        DocumentType::IdCard => {
            "- full_name: The full name on the ID card\n\
             - id_number: The ID card number\n\
             - date_of_birth: The date of birth (YYYY-MM-DD)\n\
             - address: The address on the ID card\n\
             - issue_date: When the ID was issued (YYYY-MM-DD)\n\
             - expiry_date: When the ID expires (YYYY-MM-DD)\n\
             - issuing_authority: The authority that issued the ID card"
        }
        DocumentType::UtilityBill => {
            "- account_holder: The name of the account holder\n\
             - account_number: The account or customer number\n\
             - service_provider: The utility company name\n\
             - service_type: Type of utility (electricity, water, gas, ...)\n\
             - billing_date: The date of the bill (YYYY-MM-DD)\n\
             - due_date: Payment due date (YYYY-MM-DD)\n\
             - amount_due: The amount due, as a number\n\
             - address: The service address"
        }
        DocumentType::BusinessRegistration => {
            "- business_name: The registered name of the business\n\
             - registration_number: The business registration number\n\
             - business_type: The type of business entity\n\
             - registration_date: The date of registration (YYYY-MM-DD)\n\
             - registered_address: The registered address of the business\n\
             - business_activity: The described business activity\n\
             - registration_authority: The authority that issued the registration"
        }
        DocumentType::BankStatement => {
            "- account_holder: The name of the account holder\n\
             - account_number: The bank account number\n\
             - bank_name: The name of the bank\n\
             - statement_period: The period covered by the statement\n\
             - opening_balance: The opening balance, as a number\n\
             - closing_balance: The closing balance, as a number\n\
             - address: The account holder's address"
        }
        DocumentType::Other => {
            "Return every relevant field you can identify: names, dates, numbers, \
             addresses and any other important information."
        }
    }
}

/// Correction prompt for one document. `focus` lists the fields OCR could
/// not read confidently; the model should prioritise those.
pub fn extraction_prompt(document_type: DocumentType, text: &str, focus: &[String]) -> String {
    let mut prompt = format!(
        "Extract structured information from the following {}.\n\n\
         Fields to extract:\n{}\n\n",
        document_type.as_str().replace('_', " "),
        field_guide(document_type),
    );

    if !focus.is_empty() {
        prompt.push_str(&format!(
            "OCR could not reliably read these fields, focus on them: {}\n\n",
            focus.join(", ")
        ));
    }

    prompt.push_str("Document text:\n");
    prompt.push_str(text);
    prompt
}

/// Reasoning prompt built from pre-rendered JSON sections and the computed score.
pub fn reasoning_prompt(
    user: &serde_json::Value,
    documents: &serde_json::Value,
    third_party: &serde_json::Value,
    score: f64,
) -> String {
    let pretty = |v: &serde_json::Value| {
        serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
    };

    format!(
        "Please analyze the following user information for potential fraud and risk.\n\n\
         ## Task\n\
         1. Analyze the user data, document data, and third-party data\n\
         2. Identify any discrepancies, red flags, or suspicious patterns\n\
         3. Assign a risk status (\"low\", \"medium\", or \"high\")\n\
         4. Provide detailed reasoning for your assessment\n\n\
         The automated scoring model computed a risk score of {:.2} on a 0-1 scale.\n\n\
         ## User Information\n```json\n{}\n```\n\n\
         ## Document Data\n```json\n{}\n```\n\n\
         ## Third-Party Data\n```json\n{}\n```\n\n\
         Your analysis must be thorough, fair, and based solely on the information provided.",
        score,
        pretty(user),
        pretty(documents),
        pretty(third_party),
    )
}
