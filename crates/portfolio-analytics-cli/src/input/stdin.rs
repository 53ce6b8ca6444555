use serde_json::Value;
use std::io::{self, Read};

/// Read a piped JSON (or YAML) document from stdin.
/// Returns None if stdin is a TTY (interactive) or empty.
pub fn read_stdin() -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    parse_document(&buffer)
}

fn parse_document(buffer: &str) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(Some(value)),
        Err(json_err) => {
            let value: Value = serde_yaml::from_str(trimmed)
                .map_err(|_| format!("stdin is neither valid JSON ({json_err}) nor YAML"))?;
            Ok(Some(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_and_yaml() {
        let json = parse_document(r#"{"risk_free_rate": 0.03}"#).unwrap().unwrap();
        let yaml = parse_document("risk_free_rate: 0.03\n").unwrap().unwrap();
        assert_eq!(json, yaml);
        assert!(parse_document("   ").unwrap().is_none());
    }
}
