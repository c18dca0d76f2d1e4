use serde::Deserialize;

/// Placeholder used in file names for containers without a declared name.
pub const UNNAMED: &str = "undefined";

/// A container opening a network port, as seen in the security-event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub container_id: String,
    pub container_name: Option<String>,
    pub port: u16,
    pub time: String,
}

impl NetworkEvent {
    pub fn display_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or(UNNAMED)
    }

    /// `<time>_<name>_<port>.txt`, unique per event.
    pub fn probe_file_name(&self) -> String {
        format!(
            "{}_{}_{}.txt",
            sanitize(&self.time),
            sanitize(self.display_name()),
            self.port
        )
    }
}

fn sanitize(part: &str) -> String {
    part.trim_start_matches('/').replace(['/', '\\'], "_")
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    time: Option<String>,
    #[serde(default)]
    output_fields: OutputFields,
}

#[derive(Debug, Default, Deserialize)]
struct OutputFields {
    #[serde(rename = "container.id")]
    container_id: Option<String>,
    #[serde(rename = "container.name")]
    container_name: Option<String>,
    #[serde(rename = "fd.sport")]
    port: Option<PortField>,
}

/// Falco emits ports as numbers, some pipelines as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u64),
    Text(String),
}

impl PortField {
    fn as_port(&self) -> Option<u16> {
        match self {
            Self::Number(n) => u16::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Decode one log line. Malformed JSON is an error; a well-formed event
/// without a port or container is `Ok(None)`.
pub fn parse_event(line: &str) -> Result<Option<NetworkEvent>, serde_json::Error> {
    let raw: RawEvent = serde_json::from_str(line)?;
    let fields = raw.output_fields;

    let Some(port) = fields.port.as_ref().and_then(PortField::as_port) else {
        return Ok(None);
    };
    let Some(container_id) = fields.container_id.filter(|id| !id.is_empty()) else {
        return Ok(None);
    };

    Ok(Some(NetworkEvent {
        container_id,
        container_name: fields
            .container_name
            .filter(|name| !name.is_empty() && name != "<NA>"),
        port,
        time: raw
            .time
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
    }))
}
