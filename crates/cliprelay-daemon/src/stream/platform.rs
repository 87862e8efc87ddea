//! Per-platform muxer invocation.

use std::ffi::OsString;

use cliprelay_core::Platform;

/// Default Twitch ingest; the stream key is appended.
pub const TWITCH_INGEST: &str = "rtmp://ingest.global-contribute.live-video.net/app/";

/// How to reach one platform's ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestProfile {
    pub platform: Platform,
    /// URL template; the stream key is appended verbatim.
    pub endpoint: String,
}

impl IngestProfile {
    /// Profile with the platform's default endpoint.
    pub fn new(platform: Platform) -> Self {
        let endpoint = match platform {
            Platform::Twitch => TWITCH_INGEST,
        };
        Self {
            platform,
            endpoint: endpoint.to_string(),
        }
    }

    /// Profile with an endpoint override, falling back to the default.
    pub fn with_endpoint(platform: Platform, endpoint: Option<&str>) -> Self {
        match endpoint {
            Some(endpoint) => Self {
                platform,
                endpoint: endpoint.to_string(),
            },
            None => Self::new(platform),
        }
    }

    pub fn destination_url(&self, token: &str) -> String {
        format!("{}{}", self.endpoint, token)
    }

    /// Output container for this platform.
    pub const fn output_format(&self) -> &'static str {
        match self.platform {
            Platform::Twitch => "flv",
        }
    }

    /// Full ffmpeg argument list: real-time paced stream copy from stdin.
    pub fn muxer_args(&self, token: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-loglevel",
            "warning",
            "-hide_banner",
            "-re",
            "-i",
            "pipe:0",
            "-c",
            "copy",
            "-f",
            self.output_format(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        match self.platform {
            // FLV over RTMP cannot seek back to patch the header.
            Platform::Twitch => args.extend(["-flvflags", "no_duration_filesize"].map(OsString::from)),
        }

        args.push(self.destination_url(token).into());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twitch_args_end_with_keyed_url() {
        let profile = IngestProfile::new(Platform::Twitch);
        let args = profile.muxer_args("live_abc");

        assert_eq!(args.first().map(OsString::as_os_str), Some("-loglevel".as_ref()));
        assert!(args.iter().any(|a| a == "-re"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "pipe:0"));
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "flv"));
        assert_eq!(
            args.last().map(OsString::as_os_str),
            Some(format!("{TWITCH_INGEST}live_abc").as_ref())
        );
    }

    #[test]
    fn endpoint_override() {
        let profile =
            IngestProfile::with_endpoint(Platform::Twitch, Some("rtmp://127.0.0.1/live/"));
        assert_eq!(profile.destination_url("k"), "rtmp://127.0.0.1/live/k");
        assert_eq!(
            IngestProfile::with_endpoint(Platform::Twitch, None),
            IngestProfile::new(Platform::Twitch)
        );
    }
}
