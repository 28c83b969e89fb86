use std::{
    fmt::{self, Display},
    str::FromStr,
};

use http::{uri::Scheme, Uri};
use serde_with::{DeserializeFromStr, SerializeDisplay};

#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn localhost(port: u16) -> Self {
        Endpoint {
            scheme: "http".to_owned(),
            host: "localhost".to_owned(),
            port,
        }
    }

    pub fn https(host: &str) -> Self {
        Endpoint {
            scheme: Scheme::HTTPS.to_string(),
            host: host.to_owned(),
            port: Self::default_port(Scheme::HTTPS.as_str()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn default_port(scheme: &str) -> u16 {
        if scheme == Scheme::HTTPS.as_str() {
            443
        } else {
            80
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::localhost(80)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl TryFrom<Uri> for Endpoint {
    type Error = anyhow::Error;
    fn try_from(value: Uri) -> Result<Self, Self::Error> {
        let host = value
            .host()
            .ok_or(anyhow::anyhow!(
                "Cannot parse endpoint host from URI '{value:?}'"
            ))?
            .to_owned();
        if host.is_empty() {
            return Err(anyhow::anyhow!("No host part in URI '{value:?}'"));
        }
        let scheme = value.scheme().unwrap_or(&Scheme::HTTP).to_string();
        let port = value
            .port_u16()
            .unwrap_or_else(|| Self::default_port(&scheme));
        Ok(Self { scheme, host, port })
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri: Uri = s
            .trim_end_matches('/')
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid endpoint '{s}': {e}"))?;
        Self::try_from(uri)
    }
}
