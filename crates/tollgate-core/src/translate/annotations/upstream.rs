use tollgate_api::resources::{Scheme, Timeout, Upstream};
use tollgate_api::Error;

use super::Annotations;

pub const UPSTREAM_SCHEME: &str = "upstream-scheme";
pub const UPSTREAM_RETRIES: &str = "upstream-retries";
pub const UPSTREAM_CONNECT_TIMEOUT: &str = "upstream-connect-timeout";
pub const UPSTREAM_READ_TIMEOUT: &str = "upstream-read-timeout";
pub const UPSTREAM_SEND_TIMEOUT: &str = "upstream-send-timeout";

/// Upstream settings given by annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamAnnotations {
    pub scheme: Option<Scheme>,
    pub retries: Option<u32>,
    pub timeout: Timeout,
}

impl UpstreamAnnotations {
    pub fn parse(annotations: &Annotations) -> Result<Self, Error> {
        let scheme = annotations
            .get(UPSTREAM_SCHEME)
            .map(|s| s.parse::<Scheme>().map_err(Error::new))
            .transpose()?;

        let retries = annotations
            .get_int(UPSTREAM_RETRIES)?
            .map(|n| {
                u32::try_from(n).map_err(|_| Error::new(format!("{UPSTREAM_RETRIES}: invalid count {n}")))
            })
            .transpose()?;

        let timeout = Timeout {
            connect: annotations.get_duration(UPSTREAM_CONNECT_TIMEOUT)?,
            send: annotations.get_duration(UPSTREAM_SEND_TIMEOUT)?,
            read: annotations.get_duration(UPSTREAM_READ_TIMEOUT)?,
        };

        Ok(Self {
            scheme,
            retries,
            timeout,
        })
    }

    /// Override an upstream's settings with any that were set.
    pub fn apply(&self, upstream: &mut Upstream) {
        if let Some(scheme) = self.scheme {
            upstream.scheme = Some(scheme);
        }
        if let Some(retries) = self.retries {
            upstream.retries = Some(retries);
        }
        if !self.timeout.is_empty() {
            upstream.timeout = Some(self.timeout);
        }
    }
}
