//! Shell source synthesis for scripts and environment injection

use std::collections::BTreeMap;

use vt_core::TunnelError;

/// Interpreter that scripts are fed to on stdin
pub const SCRIPT_INTERPRETER: &str = "/bin/bash";

const SCRIPT_PREAMBLE: &str = "#!/bin/bash\nset -e\n";

/// Quote `value` for POSIX shells as a single-quoted word.
///
/// Embedded single quotes become `'\''`: close the quote, an escaped quote,
/// reopen the quote.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Whether `name` is a valid shell variable name
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject environment names that would be spliced into shell source unsafely
pub fn validate_env(env: &BTreeMap<String, String>) -> Result<(), TunnelError> {
    match env.keys().find(|name| !is_valid_env_name(name)) {
        Some(name) => Err(TunnelError::InvalidInput(format!(
            "invalid environment variable name {:?}",
            name
        ))),
        None => Ok(()),
    }
}

/// Full script body: preamble, one export per variable, then `script` verbatim
pub fn build_script(script: &str, env: &BTreeMap<String, String>) -> Result<String, TunnelError> {
    validate_env(env)?;

    let mut body = String::from(SCRIPT_PREAMBLE);
    for (name, value) in env {
        body.push_str(&format!("export {}={}\n", name, shell_quote(value)));
    }
    body.push_str(script);
    Ok(body)
}

/// Single command line exporting `env` and then running `command`
pub fn export_prefixed(command: &str, env: &BTreeMap<String, String>) -> Result<String, TunnelError> {
    validate_env(env)?;

    let mut line = String::new();
    for (name, value) in env {
        line.push_str(&format!("export {}={}; ", name, shell_quote(value)));
    }
    line.push_str(command);
    Ok(line)
}
