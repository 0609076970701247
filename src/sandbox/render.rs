//! Template-variable substitution and config template materialization used
//! by [`crate::sandbox::instance::ServerInstance::start`].

use std::collections::HashMap;
use std::path::Path;

use crate::error::AgentError;
use crate::sandbox::types::StartData;

/// Renders every `{{NAME}}` occurrence in `template` from `vars`. Unknown
/// tokens are left untouched rather than erroring — an unrecognized
/// placeholder in a user-authored core template is not this layer's concern.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if template[i..].starts_with("{{") {
            if let Some(end) = template[i + 2..].find("}}") {
                let name = &template[i + 2..i + 2 + end];
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                    i += 2 + end + 2;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Builds the substitution variable set: `SERVER_MEMORY`, `SERVER_PORT`,
/// `SERVER_IP`, and every `environment` entry.
pub fn template_vars(start: &StartData) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("SERVER_MEMORY".to_string(), start.memory.to_string());
    vars.insert(
        "SERVER_PORT".to_string(),
        start.primary_allocation.port.to_string(),
    );
    vars.insert("SERVER_IP".to_string(), start.primary_allocation.ip.clone());
    for (k, v) in &start.environment {
        vars.insert(k.clone(), v.clone());
    }
    vars
}

/// Writes one rendered config template to `path`. If the rendered text
/// parses as a JSON object or array it is re-serialized with two-space
/// indentation; otherwise the rendered text (e.g. `key=value` lines) is
/// written verbatim.
pub fn write_config_file(path: &Path, rendered: &str) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::RuntimeFailed(format!("mkdir for config template: {e}")))?;
    }

    let content = match serde_json::from_str::<serde_json::Value>(rendered) {
        Ok(value @ serde_json::Value::Object(_)) | Ok(value @ serde_json::Value::Array(_)) => {
            serde_json::to_string_pretty(&value)
                .map_err(|e| AgentError::RuntimeFailed(format!("re-serializing template: {e}")))?
        }
        _ => rendered.to_string(),
    };

    std::fs::write(path, content)
        .map_err(|e| AgentError::RuntimeFailed(format!("writing config template: {e}")))
}

/// Composes the final container command from the core's install script and
/// startup command, per spec §4.4 step 3.
pub fn compose_command(install_script: &str, startup_command: &str) -> String {
    let startup = if startup_command.trim_start().starts_with("exec") {
        startup_command.to_string()
    } else {
        format!("exec {startup_command}")
    };

    if install_script.trim().is_empty() {
        startup
    } else {
        format!("{install_script}\n{startup}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_tokens() {
        let mut vars = HashMap::new();
        vars.insert("SERVER_PORT".to_string(), "25565".to_string());
        assert_eq!(render("-p {{SERVER_PORT}}", &vars), "-p 25565");
    }

    #[test]
    fn leaves_unknown_tokens_untouched() {
        let vars = HashMap::new();
        assert_eq!(render("{{MYSTERY}}", &vars), "{{MYSTERY}}");
    }

    #[test]
    fn compose_prefixes_exec_once() {
        assert_eq!(compose_command("", "java -jar server.jar"), "exec java -jar server.jar");
        assert_eq!(compose_command("", "exec java -jar server.jar"), "exec java -jar server.jar");
    }

    #[test]
    fn compose_prepends_install_script() {
        let cmd = compose_command("apt-get update", "run.sh");
        assert_eq!(cmd, "apt-get update\nexec run.sh");
    }

    #[test]
    fn write_config_reserializes_json_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.properties.json");
        write_config_file(&path, r#"{"port":25565,"difficulty":"normal"}"#).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n"));
        let reparsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(reparsed["port"], 25565);
    }

    #[test]
    fn write_config_keeps_key_value_text_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.properties");
        write_config_file(&path, "port=25565\ndifficulty=normal\n").unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "port=25565\ndifficulty=normal\n");
    }
}
