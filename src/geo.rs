use std::time::Duration;

/// Best-effort IP to country-code resolution.
///
/// This is the single fail-open lookup in the system: any transport or parse
/// failure returns `None` with a stderr warning, and callers treat `None` as
/// "no geography opinion". Every other store or lookup failure in the gates
/// propagates as an error.
#[derive(Clone)]
pub struct GeoLookup {
    client: reqwest::Client,
    /// Endpoint template containing `{ip}`, e.g. "https://ipapi.co/{ip}/country/"
    endpoint: String,
}

impl GeoLookup {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    /// Resolve an IP to an uppercase ISO country code, or `None` when the
    /// lookup fails for any reason.
    pub async fn country(&self, ip: &str) -> Option<String> {
        let url = self.endpoint.replace("{ip}", ip);

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                eprintln!("Geo lookup failed for {} (allowing request): {}", ip, e);
                return None;
            }
        };

        if !response.status().is_success() {
            eprintln!(
                "Geo lookup returned {} for {} (allowing request)",
                response.status(),
                ip
            );
            return None;
        }

        match response.text().await {
            Ok(body) => {
                let code = body.trim().to_uppercase();
                if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
                    Some(code)
                } else {
                    eprintln!("Geo lookup gave malformed country {:?} for {}", body, ip);
                    None
                }
            }
            Err(e) => {
                eprintln!("Geo lookup body read failed for {}: {}", ip, e);
                None
            }
        }
    }
}
