use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::MessagingProvider;

/// WhatsApp delivery through the Twilio Messages API.
pub struct TwilioWhatsAppProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

impl TwilioWhatsAppProvider {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .context("failed to build Twilio HTTP client")?;
        Ok(Self {
            account_sid,
            auth_token,
            from_number: whatsapp_address(&from_number),
            client,
        })
    }
}

#[async_trait]
impl MessagingProvider for TwilioWhatsAppProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let to = whatsapp_address(to);

        self.client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to.as_str()), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .context("failed to send WhatsApp message")?
            .error_for_status()
            .context("Twilio API returned error")?;

        Ok(())
    }
}
