use gpioman::driver::{DriverError, LevelProbe, LineDriver, MockLineDriver};
use gpioman::protocol::*;
use gpioman::*;

fn registry_with(names: &[&str]) -> (Registry, Vec<LevelProbe>) {
    let registry = Registry::new(TimingConfig::default());
    let mut probes = Vec::new();
    for name in names {
        let (driver, probe) = MockLineDriver::new();
        registry
            .bind(name, move || Ok::<Box<dyn LineDriver>, DriverError>(Box::new(driver)))
            .unwrap();
        probes.push(probe);
    }
    (registry, probes)
}

fn write(line: &str, attribute: &str, value: &str) -> Request {
    Request {
        id: 42,
        command: CommandType::WriteAttribute {
            line: line.into(),
            attribute: attribute.into(),
            value: value.into(),
        },
    }
}

#[test]
fn test_ping() {
    let (registry, _) = registry_with(&[]);
    let request = parse_request(r#"{"id":1,"command":"Ping"}"#).unwrap();
    let response = handle_request(&registry, request);

    assert!(response.is_success());
    assert_eq!(response.id, 1);
    assert_eq!(response.message.as_deref(), Some("pong"));
}

#[test]
fn test_list_lines_sorted_by_name() {
    let (registry, _) = registry_with(&["status", "led1", "led0"]);
    let response = handle_request(&registry, Request { id: 2, command: CommandType::ListLines });

    let names: Vec<_> = response.lines.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["led0", "led1", "status"]);
    assert!(response.lines.iter().all(|l| !l.enabled && l.level == Level::Deasserted));
}

#[test]
fn test_write_then_read_attribute() {
    let (registry, probes) = registry_with(&["led0"]);

    let response = handle_request(&registry, write("led0", "freq", "10"));
    assert!(response.is_success());
    assert_eq!(response.value, Some(10));

    let response = handle_request(&registry, write("led0", "on_cycles", " 3\n"));
    assert!(response.is_success());
    assert_eq!(response.lines[0].on_cycles, 3);

    let response = handle_request(&registry, write("led0", "status", "1"));
    assert!(response.is_success());
    assert_eq!(probes[0].history(), vec![Level::Asserted]);

    let read = Request {
        id: 43,
        command: CommandType::ReadAttribute {
            line: "led0".into(),
            attribute: "frequency".into(),
        },
    };
    let response = handle_request(&registry, read);
    assert_eq!(response.value, Some(10));
}

#[test]
fn test_invalid_value_rejected_without_change() {
    let (registry, probes) = registry_with(&["led0"]);
    let before = registry.get("led0").unwrap().snapshot();

    for (attribute, value) in [("on_cycles", "-1"), ("frequency", "fast"), ("enabled", "2"), ("off_cycles", "99999999999")] {
        let response = handle_request(&registry, write("led0", attribute, value));
        assert_eq!(response.status, ResponseStatus::Rejected, "{} = {}", attribute, value);
        assert!(response.message.is_some());
    }

    assert_eq!(registry.get("led0").unwrap().snapshot(), before);
    assert_eq!(probes[0].count(), 0);
}

#[test]
fn test_unknown_attribute_rejected() {
    let (registry, _) = registry_with(&["led0"]);
    let response = handle_request(&registry, write("led0", "duty", "50"));
    assert_eq!(response.status, ResponseStatus::Rejected);
}

#[test]
fn test_unknown_line() {
    let (registry, _) = registry_with(&["led0"]);

    let response = handle_request(&registry, write("led9", "enabled", "1"));
    assert_eq!(response.status, ResponseStatus::UnknownLine);
    assert_eq!(response.id, 42);

    let read = Request { id: 5, command: CommandType::ReadLine { line: "led9".into() } };
    assert_eq!(handle_request(&registry, read).status, ResponseStatus::UnknownLine);
}

#[test]
fn test_read_line_snapshot() {
    let (registry, _) = registry_with(&["led0"]);
    handle_request(&registry, write("led0", "off_cycles", "3"));

    let read = Request { id: 6, command: CommandType::ReadLine { line: "led0".into() } };
    let response = handle_request(&registry, read);

    assert!(response.is_success());
    assert_eq!(response.lines.len(), 1);
    assert_eq!(response.lines[0].off_cycles, 3);
    assert_eq!(response.lines[0].on_cycles, 1);
}

#[test]
fn test_response_wire_format() {
    let (registry, _) = registry_with(&["led0"]);
    let response = handle_request(&registry, write("led0", "enabled", "1"));
    let json = serde_json::to_string(&response).unwrap();

    assert!(json.contains(r#""status":"Success""#));
    assert!(json.contains(r#""level":"asserted""#));
    assert!(!json.contains("message"));

    let decoded: Response = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, response);
}

#[test]
fn test_garbage_input_answered_with_invalid_command() {
    for input in ["", "{", r#"{"id":1,"command":"Reboot"}"#] {
        let error = parse_request(input).unwrap_err();
        assert_eq!(invalid_request(&error).status, ResponseStatus::InvalidCommand);
    }
}
