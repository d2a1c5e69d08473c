//! Print-and-mail provider client
//!
//! XML-over-HTTP. The flow for one letter: correct the address, estimate the
//! cost, then create a batch, upload the PDF and manifest, and submit. The
//! provider's estimate responses vary by product, so the amount is extracted
//! by scanning for a plausibly named numeric field.

use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use voxway_core::{Result, VoxwayError};

use crate::config::MailConfig;
use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAddress {
    pub name: String,
    pub organization: Option<String>,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

#[derive(Debug, Clone)]
pub struct CorrectedAddress {
    pub address: MailAddress,
    pub nonmailable: bool,
}

#[derive(Clone)]
pub struct PrintMailClient {
    http: reqwest::Client,
    config: MailConfig,
}

/// Flatten an XML document into (element name, text) pairs, depth-first.
fn scan_xml_fields(xml: &str) -> Vec<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                if let (Some(name), Ok(text)) = (stack.last(), t.unescape()) {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        fields.push((name.clone(), text));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    fields
}

/// Pull the estimate amount out of a cost response: any numeric field whose
/// name mentions total/cost/amount/price, with a sane dollar value.
pub fn extract_cost_estimate(xml: &str) -> Option<Decimal> {
    const KEYWORDS: [&str; 4] = ["total", "cost", "amount", "price"];
    for (name, text) in scan_xml_fields(xml) {
        let lower = name.to_lowercase();
        if !KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        if let Ok(value) = text.parse::<Decimal>() {
            if value > Decimal::ZERO && value < Decimal::from(1000) {
                return Some(value);
            }
        }
    }
    None
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn address_xml(address: &MailAddress) -> String {
    format!(
        "<address><name>{}</name><organization>{}</organization>\
         <address1>{}</address1><address2>{}</address2>\
         <city>{}</city><state>{}</state><postalCode>{}</postalCode></address>",
        xml_escape(&address.name),
        xml_escape(address.organization.as_deref().unwrap_or("")),
        xml_escape(&address.address1),
        xml_escape(address.address2.as_deref().unwrap_or("")),
        xml_escape(&address.city),
        xml_escape(&address.state),
        xml_escape(&address.postal_code),
    )
}

impl PrintMailClient {
    pub fn new(config: MailConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self { http, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn post_xml(&self, path: &str, body: String) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/{}", self.config.base_url, path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| network_error(path, e))?;

        if !resp.status().is_success() {
            return Err(provider_error(path, resp).await);
        }
        resp.text().await.map_err(|e| network_error(path, e))
    }

    /// Validate and standardize a recipient address. A `nonmailable` result
    /// means the letter must not be attempted.
    pub async fn address_correction(&self, address: &MailAddress) -> Result<CorrectedAddress> {
        let xml = self
            .post_xml("addressCorrection", address_xml(address))
            .await?;

        let fields = scan_xml_fields(&xml);
        let field = |name: &str| -> Option<String> {
            fields
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let nonmailable = field("nonmailable")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let corrected = MailAddress {
            name: address.name.clone(),
            organization: address.organization.clone(),
            address1: field("address1").unwrap_or_else(|| address.address1.clone()),
            address2: field("address2").or_else(|| address.address2.clone()),
            city: field("city").unwrap_or_else(|| address.city.clone()),
            state: field("state").unwrap_or_else(|| address.state.clone()),
            postal_code: field("postalCode")
                .or_else(|| field("zip"))
                .unwrap_or_else(|| address.postal_code.clone()),
        };

        Ok(CorrectedAddress {
            address: corrected,
            nonmailable,
        })
    }

    /// Ask the provider what this piece will cost to print and mail.
    pub async fn cost_estimate(&self, page_count: u32) -> Result<Decimal> {
        let body = format!(
            "<costEstimate><documentClass>Letter 8.5 x 11</documentClass>\
             <layout>Address on Separate Page</layout>\
             <productionTime>Next Day</productionTime>\
             <envelope>#10 Double Window</envelope><color>Black and White</color>\
             <paperType>White 24#</paperType><printOption>Printing both sides</printOption>\
             <mailClass>First Class</mailClass><pageCount>{}</pageCount>\
             <quantity>1</quantity></costEstimate>",
            page_count
        );
        let xml = self.post_xml("costEstimate", body).await?;

        extract_cost_estimate(&xml).ok_or_else(|| {
            VoxwayError::Provider("Cost estimate response had no usable amount".to_string())
        })
    }

    pub async fn create_batch(&self) -> Result<String> {
        let xml = self
            .post_xml("v1/batches", "<batch><name>portal</name></batch>".to_string())
            .await?;
        scan_xml_fields(&xml)
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("id"))
            .map(|(_, v)| v)
            .ok_or_else(|| VoxwayError::Provider("Batch create response had no id".to_string()))
    }

    pub async fn upload_pdf(&self, batch_id: &str, filename: &str, pdf: Vec<u8>) -> Result<()> {
        let resp = self
            .http
            .post(format!(
                "{}/v1/batches/{}/files/{}",
                self.config.base_url, batch_id, filename
            ))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Content-Type", "application/pdf")
            .body(pdf)
            .send()
            .await
            .map_err(|e| network_error("batch pdf upload", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("batch pdf upload", resp).await);
        }
        Ok(())
    }

    /// Upload the job manifest tying the uploaded PDF to its recipient.
    pub async fn upload_manifest(
        &self,
        batch_id: &str,
        pdf_filename: &str,
        recipient: &MailAddress,
    ) -> Result<()> {
        let manifest = format!(
            "<manifest><job><document>{}</document>{}</job></manifest>",
            xml_escape(pdf_filename),
            address_xml(recipient),
        );
        self.post_xml(&format!("v1/batches/{}/manifest", batch_id), manifest)
            .await?;
        Ok(())
    }

    pub async fn submit_batch(&self, batch_id: &str) -> Result<()> {
        self.post_xml(&format!("v1/batches/{}/submit", batch_id), String::new())
            .await?;
        Ok(())
    }

    pub async fn batch_status(&self, batch_id: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/v1/batches/{}", self.config.base_url, batch_id))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| network_error("batch status", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("batch status", resp).await);
        }
        let xml = resp.text().await.map_err(|e| network_error("batch status", e))?;
        Ok(scan_xml_fields(&xml)
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("status"))
            .map(|(_, v)| v)
            .unwrap_or_default())
    }

    /// Fetch the IMpb tracking number for a submitted batch, if available yet.
    pub async fn tracking(&self, batch_id: &str) -> Result<Option<String>> {
        let resp = self
            .http
            .get(format!(
                "{}/v1/batches/{}/tracking?trackingType=impb",
                self.config.base_url, batch_id
            ))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| network_error("batch tracking", e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(provider_error("batch tracking", resp).await);
        }
        let xml = resp.text().await.map_err(|e| network_error("batch tracking", e))?;
        Ok(scan_xml_fields(&xml)
            .into_iter()
            .find(|(n, _)| {
                n.eq_ignore_ascii_case("trackingNumber") || n.eq_ignore_ascii_case("barcode")
            })
            .map(|(_, v)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_extract_cost_estimate_finds_total() {
        let xml = "<costEstimateResponse><status>0</status>\
                   <description>ok</description><totalCost>1.07</totalCost>\
                   </costEstimateResponse>";
        assert_eq!(extract_cost_estimate(xml), Some(dec!(1.07)));
    }

    #[test]
    fn test_extract_cost_estimate_skips_out_of_range() {
        let xml = "<r><totalCost>0</totalCost><amount>25000</amount><price>2.50</price></r>";
        assert_eq!(extract_cost_estimate(xml), Some(dec!(2.50)));
    }

    #[test]
    fn test_extract_cost_estimate_ignores_unrelated_fields() {
        let xml = "<r><status>3</status><jobId>42</jobId></r>";
        assert_eq!(extract_cost_estimate(xml), None);
    }

    #[test]
    fn test_scan_xml_fields_nested() {
        let xml = "<a><b>1</b><c><d>x</d></c></a>";
        let fields = scan_xml_fields(xml);
        assert!(fields.contains(&("b".to_string(), "1".to_string())));
        assert!(fields.contains(&("d".to_string(), "x".to_string())));
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a&b<c>"), "a&amp;b&lt;c&gt;");
    }
}
