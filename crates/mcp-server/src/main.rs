use anyhow::{Context, Result};
use glycograph_clinical::{
    ClinicalEngine, PatientHistoryView, Suitability, Vocabulary, DIABETES_NS, DRUG_CLASS,
};
use serde_json::{json, Value as JsonValue};
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

const MAX_MESSAGE_BYTES: usize = 1_048_576; // 1 MiB
const MAX_HISTORY_BYTES: usize = 64 * 1024; // 64 KiB
const MAX_LABELS: usize = 256;
const MAX_ENTITY_BYTES: usize = 2048;

/// Server settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Config {
    ontology_path: PathBuf,
    namespace: String,
    drug_class: String,
}

impl Config {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let namespace = lookup("GLYCOGRAPH_NAMESPACE").unwrap_or_else(|| DIABETES_NS.to_string());
        // Relative IRIs cannot be written back to the ontology file.
        anyhow::ensure!(
            namespace.contains(':'),
            "GLYCOGRAPH_NAMESPACE {namespace:?} is not an absolute IRI"
        );
        Ok(Self {
            ontology_path: lookup("GLYCOGRAPH_ONTOLOGY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./diabetes.nt")),
            namespace,
            drug_class: lookup("GLYCOGRAPH_DRUG_CLASS").unwrap_or_else(|| DRUG_CLASS.to_string()),
        })
    }

    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::new(&self.namespace).with_drug_class(&self.drug_class)
    }
}

struct AppState {
    engine: ClinicalEngine,
}

impl AppState {
    fn open(config: &Config) -> Result<Self> {
        let engine = ClinicalEngine::open(&config.ontology_path, config.vocabulary())?;
        tracing::info!(
            path = %config.ontology_path.display(),
            triples = engine.graph().len()?,
            "ontology loaded"
        );
        Ok(Self { engine })
    }
}

fn main() -> Result<()> {
    // Stdout carries protocol frames; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("glycograph=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env()?;
    let state = AppState::open(&config)
        .with_context(|| format!("failed to open ontology {}", config.ontology_path.display()))?;
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    loop {
        let maybe = match read_message(&mut reader) {
            Ok(m) => m,
            Err(e) => {
                // Bad framing gets a parse error; the next message is still read.
                tracing::warn!(error = %e, "unreadable message");
                let err_resp = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": format!("Parse error: {e}") }
                });
                write_message(&mut writer, &err_resp)?;
                continue;
            }
        };
        let Some(request) = maybe else {
            break;
        };
        if let Some(response) = handle_request(&state, &request) {
            write_message(&mut writer, &response)?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<JsonValue>> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .context("invalid Content-Length")?,
                );
            }
        }
    }

    let len = content_length.context("missing Content-Length header")?;
    if len > MAX_MESSAGE_BYTES {
        anyhow::bail!(
            "Content-Length {} exceeds max allowed {} bytes",
            len,
            MAX_MESSAGE_BYTES
        );
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    let value: JsonValue = serde_json::from_slice(&payload).context("invalid JSON payload")?;
    Ok(Some(value))
}

fn write_message<W: Write>(writer: &mut W, value: &JsonValue) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

fn handle_request(state: &AppState, req: &JsonValue) -> Option<JsonValue> {
    let id = req.get("id").cloned();
    let method = req.get("method").and_then(JsonValue::as_str)?;

    match method {
        "initialize" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "glycograph-mcp", "version": env!("CARGO_PKG_VERSION") }
                }
            })
        }),
        "notifications/initialized" => None,
        "tools/list" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "tools": tools_schema()
                }
            })
        }),
        "tools/call" => id.map(|id_val| {
            let result = call_tool(state, req.get("params"));
            match result {
                Ok(tool_result) => json!({
                    "jsonrpc": "2.0",
                    "id": id_val,
                    "result": tool_result
                }),
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "tool call failed");
                    json!({
                        "jsonrpc": "2.0",
                        "id": id_val,
                        "result": {
                            "content": [{ "type": "text", "text": format!("tool error: {err:#}") }],
                            "isError": true
                        }
                    })
                }
            }
        }),
        "ping" => id.map(|id_val| json!({ "jsonrpc": "2.0", "id": id_val, "result": {} })),
        _ => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "error": {
                    "code": -32601,
                    "message": format!("method not found: {method}")
                }
            })
        }),
    }
}

fn tools_schema() -> Vec<JsonValue> {
    let patient_id = json!({"type": "integer", "minimum": 0});
    vec![
        json!({
            "name": "register_patient",
            "description": "Create the ontology individual for a new patient.",
            "inputSchema": {
                "type": "object",
                "properties": { "patient_id": patient_id },
                "required": ["patient_id"]
            }
        }),
        json!({
            "name": "update_history",
            "description": "Replace a patient's disease history and adverse drug reactions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "patient_id": patient_id,
                    "history": {
                        "type": "object",
                        "description": "Condition labels per category (cvd, renalGu, others, hypo, weight, bone, giSx, chf) plus adrs: drug labels.",
                        "additionalProperties": {"type": "array", "items": {"type": "string"}}
                    }
                },
                "required": ["patient_id", "history"]
            }
        }),
        json!({
            "name": "suitable_drugs",
            "description": "List glucose-lowering agents with no contraindication for the patient.",
            "inputSchema": {
                "type": "object",
                "properties": { "patient_id": patient_id },
                "required": ["patient_id"]
            }
        }),
        json!({
            "name": "patient_profile",
            "description": "Current history and adverse reactions recorded for a patient.",
            "inputSchema": {
                "type": "object",
                "properties": { "patient_id": patient_id },
                "required": ["patient_id"]
            }
        }),
        json!({
            "name": "facts_about",
            "description": "Return all facts whose subject is the given individual.",
            "inputSchema": {
                "type": "object",
                "properties": { "entity": {"type": "string"} },
                "required": ["entity"]
            }
        }),
    ]
}

fn patient_id_arg(args: &JsonValue) -> Result<u64> {
    args.get("patient_id")
        .and_then(JsonValue::as_u64)
        .context("patient_id is required and must be a non-negative integer")
}

fn call_tool(state: &AppState, params: Option<&JsonValue>) -> Result<JsonValue> {
    let name = params
        .and_then(|v| v.get("name"))
        .and_then(JsonValue::as_str)
        .context("missing tool name")?;
    let args = params
        .and_then(|v| v.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    match name {
        "register_patient" => {
            let patient_id = patient_id_arg(&args)?;
            let created = state.engine.register_patient(patient_id)?;
            let text = if created {
                format!("registered patient {patient_id}")
            } else {
                format!("patient {patient_id} already registered")
            };
            Ok(json!({
                "content": [{ "type": "text", "text": text }],
                "structuredContent": { "patient_id": patient_id, "created": created }
            }))
        }
        "update_history" => {
            let patient_id = patient_id_arg(&args)?;
            let raw = args.get("history").context("history is required")?;
            if !raw.is_object() {
                anyhow::bail!("history must be an object");
            }
            if serde_json::to_vec(raw)?.len() > MAX_HISTORY_BYTES {
                anyhow::bail!("history exceeds max allowed size ({} bytes)", MAX_HISTORY_BYTES);
            }
            let view: PatientHistoryView =
                serde_json::from_value(raw.clone()).context("history has an invalid shape")?;
            let labels = view.conditions().count() + view.adverse_reactions().len();
            if labels > MAX_LABELS {
                anyhow::bail!("history exceeds max allowed label count ({MAX_LABELS})");
            }
            let report = state.engine.sync_history(patient_id, &view)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!(
                    "patient {patient_id}: {} condition(s), {} adverse reaction(s)",
                    report.history.len(),
                    report.adverse_reactions.len()
                ) }],
                "structuredContent": report
            }))
        }
        "suitable_drugs" => {
            let patient_id = patient_id_arg(&args)?;
            let outcome = state.engine.suitable_drugs(patient_id)?;
            let text = match &outcome {
                Suitability::Suitable(drugs) => drugs.join(", "),
                Suitability::NoneSuitable => "no suitable drug".to_string(),
            };
            Ok(json!({
                "content": [{ "type": "text", "text": text }],
                "structuredContent": outcome
            }))
        }
        "patient_profile" => {
            let patient_id = patient_id_arg(&args)?;
            let profile = state.engine.patient_profile(patient_id)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!(
                    "patient {patient_id}: {} condition(s), {} adverse reaction(s)",
                    profile.history.len(),
                    profile.adverse_reactions.len()
                ) }],
                "structuredContent": profile
            }))
        }
        "facts_about" => {
            let entity = args
                .get("entity")
                .and_then(JsonValue::as_str)
                .context("entity is required")?;
            if entity.len() > MAX_ENTITY_BYTES {
                anyhow::bail!("entity exceeds max allowed size ({} bytes)", MAX_ENTITY_BYTES);
            }
            let facts = state.engine.facts_about(entity)?;
            let summary = format!("{} fact(s) about {entity}", facts.len());
            Ok(json!({
                "content": [{ "type": "text", "text": summary }],
                "structuredContent": { "facts": facts }
            }))
        }
        _ => anyhow::bail!("unknown tool: {name}"),
    }
}
