//! The closed set of motor actions the model may request. Parsing is strict:
//! unknown names fall through to the item-tool table, malformed arguments
//! become error records the model has to recover from.

use serde_json::Value;

use trolley_browser::actuator::{Actuator, ScrollDirection};
use trolley_core::types::Observation;
use trolley_core::{Error, Result};

use crate::decision::ToolSchema;

/// The model addresses the screen in a 0..=999 coordinate space regardless
/// of the real viewport.
const MODEL_SPACE: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub enum MotorAction {
    OpenWebBrowser,
    ClickAt {
        x: f64,
        y: f64,
    },
    HoverAt {
        x: f64,
        y: f64,
    },
    TypeTextAt {
        x: f64,
        y: f64,
        text: String,
        press_enter: bool,
        clear_before_typing: bool,
    },
    ScrollDocument {
        direction: ScrollDirection,
    },
    ScrollAt {
        x: f64,
        y: f64,
        direction: ScrollDirection,
        magnitude: f64,
    },
    Wait5Seconds,
    GoBack,
    GoForward,
    Navigate {
        url: String,
    },
    KeyCombination {
        keys: Vec<String>,
    },
    DragAndDrop {
        x: f64,
        y: f64,
        destination_x: f64,
        destination_y: f64,
    },
}

fn require_f64(args: &Value, field: &str, name: &str) -> Result<f64> {
    args.get(field).and_then(Value::as_f64).ok_or_else(|| {
        Error::UnsupportedAction(format!("{name}: missing or non-numeric '{field}'"))
    })
}

fn require_str(args: &Value, field: &str, name: &str) -> Result<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::UnsupportedAction(format!("{name}: missing '{field}'")))
}

fn require_direction(args: &Value, name: &str) -> Result<ScrollDirection> {
    let raw = require_str(args, "direction", name)?;
    ScrollDirection::parse(&raw)
        .ok_or_else(|| Error::UnsupportedAction(format!("{name}: unknown direction '{raw}'")))
}

fn parse_keys(args: &Value, name: &str) -> Result<Vec<String>> {
    match args.get("keys") {
        Some(Value::Array(items)) => {
            let keys: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                Err(Error::UnsupportedAction(format!("{name}: empty key list")))
            } else {
                Ok(keys)
            }
        }
        // "ctrl+a" style shorthand.
        Some(Value::String(joined)) if !joined.is_empty() => {
            Ok(joined.split('+').map(|k| k.trim().to_string()).collect())
        }
        _ => Err(Error::UnsupportedAction(format!("{name}: missing 'keys'"))),
    }
}

impl MotorAction {
    /// `None` means the name is not a motor action; `Some(Err)` means it is,
    /// but the arguments do not parse.
    pub fn parse(name: &str, args: &Value) -> Option<Result<Self>> {
        let parsed = match name {
            "open_web_browser" => Ok(Self::OpenWebBrowser),
            "click_at" => (|| {
                Ok(Self::ClickAt {
                    x: require_f64(args, "x", name)?,
                    y: require_f64(args, "y", name)?,
                })
            })(),
            "hover_at" => (|| {
                Ok(Self::HoverAt {
                    x: require_f64(args, "x", name)?,
                    y: require_f64(args, "y", name)?,
                })
            })(),
            "type_text_at" => (|| {
                Ok(Self::TypeTextAt {
                    x: require_f64(args, "x", name)?,
                    y: require_f64(args, "y", name)?,
                    text: require_str(args, "text", name)?,
                    press_enter: args
                        .get("press_enter")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                    clear_before_typing: args
                        .get("clear_before_typing")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                })
            })(),
            "scroll_document" => (|| {
                Ok(Self::ScrollDocument {
                    direction: require_direction(args, name)?,
                })
            })(),
            "scroll_at" => (|| {
                Ok(Self::ScrollAt {
                    x: require_f64(args, "x", name)?,
                    y: require_f64(args, "y", name)?,
                    direction: require_direction(args, name)?,
                    magnitude: args
                        .get("magnitude")
                        .and_then(Value::as_f64)
                        .unwrap_or(800.0),
                })
            })(),
            "wait_5_seconds" => Ok(Self::Wait5Seconds),
            "go_back" => Ok(Self::GoBack),
            "go_forward" => Ok(Self::GoForward),
            "navigate" => (|| {
                Ok(Self::Navigate {
                    url: require_str(args, "url", name)?,
                })
            })(),
            "key_combination" => parse_keys(args, name).map(|keys| Self::KeyCombination { keys }),
            "drag_and_drop" => (|| {
                Ok(Self::DragAndDrop {
                    x: require_f64(args, "x", name)?,
                    y: require_f64(args, "y", name)?,
                    destination_x: require_f64(args, "destination_x", name)?,
                    destination_y: require_f64(args, "destination_y", name)?,
                })
            })(),
            _ => return None,
        };
        Some(parsed)
    }

    /// Executes against the actuator, denormalizing model-space coordinates
    /// to the actual viewport.
    pub async fn dispatch(&self, actuator: &dyn Actuator) -> Result<Observation> {
        let (width, height) = actuator.screen_size();
        let dx = |v: f64| v * width as f64 / MODEL_SPACE;
        let dy = |v: f64| v * height as f64 / MODEL_SPACE;

        match self {
            Self::OpenWebBrowser => actuator.open_web_browser().await,
            Self::ClickAt { x, y } => actuator.click_at(dx(*x), dy(*y)).await,
            Self::HoverAt { x, y } => actuator.hover_at(dx(*x), dy(*y)).await,
            Self::TypeTextAt {
                x,
                y,
                text,
                press_enter,
                clear_before_typing,
            } => {
                actuator
                    .type_text_at(dx(*x), dy(*y), text, *press_enter, *clear_before_typing)
                    .await
            }
            Self::ScrollDocument { direction } => {
                let magnitude = match direction {
                    ScrollDirection::Up | ScrollDirection::Down => height as f64 * 0.8,
                    ScrollDirection::Left | ScrollDirection::Right => width as f64 * 0.8,
                };
                actuator.scroll_document(*direction, magnitude).await
            }
            Self::ScrollAt {
                x,
                y,
                direction,
                magnitude,
            } => {
                let magnitude = match direction {
                    ScrollDirection::Up | ScrollDirection::Down => dy(*magnitude),
                    ScrollDirection::Left | ScrollDirection::Right => dx(*magnitude),
                };
                actuator
                    .scroll_at(dx(*x), dy(*y), *direction, magnitude)
                    .await
            }
            Self::Wait5Seconds => actuator.wait_seconds(5.0).await,
            Self::GoBack => actuator.go_back().await,
            Self::GoForward => actuator.go_forward().await,
            Self::Navigate { url } => actuator.navigate(url).await,
            Self::KeyCombination { keys } => actuator.key_combination(keys).await,
            Self::DragAndDrop {
                x,
                y,
                destination_x,
                destination_y,
            } => {
                actuator
                    .drag_and_drop(dx(*x), dy(*y), dx(*destination_x), dy(*destination_y))
                    .await
            }
        }
    }
}

fn coord_params(extra: &[(&str, Value)]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "x".to_string(),
        serde_json::json!({"type": "number", "description": "x in 0-999 screen space"}),
    );
    properties.insert(
        "y".to_string(),
        serde_json::json!({"type": "number", "description": "y in 0-999 screen space"}),
    );
    let mut required = vec!["x", "y"];
    for (name, schema) in extra {
        properties.insert(name.to_string(), schema.clone());
        if !matches!(schema.get("optional"), Some(Value::Bool(true))) {
            required.push(name);
        }
    }
    serde_json::json!({"type": "object", "properties": properties, "required": required})
}

/// Declarations for every motor action, handed to the decision service.
pub fn schemas() -> Vec<ToolSchema> {
    let direction = serde_json::json!({"type": "string", "enum": ["up", "down", "left", "right"]});
    let empty = serde_json::json!({"type": "object", "properties": {}});
    vec![
        ToolSchema {
            name: "open_web_browser".to_string(),
            description: "Return to the store landing page.".to_string(),
            parameters: empty.clone(),
        },
        ToolSchema {
            name: "click_at".to_string(),
            description: "Click at a screen coordinate.".to_string(),
            parameters: coord_params(&[]),
        },
        ToolSchema {
            name: "hover_at".to_string(),
            description: "Hover the mouse at a screen coordinate.".to_string(),
            parameters: coord_params(&[]),
        },
        ToolSchema {
            name: "type_text_at".to_string(),
            description: "Click at a coordinate, then type text.".to_string(),
            parameters: coord_params(&[
                ("text", serde_json::json!({"type": "string"})),
                (
                    "press_enter",
                    serde_json::json!({"type": "boolean", "optional": true}),
                ),
                (
                    "clear_before_typing",
                    serde_json::json!({"type": "boolean", "optional": true}),
                ),
            ]),
        },
        ToolSchema {
            name: "scroll_document".to_string(),
            description: "Scroll the whole page.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"direction": direction},
                "required": ["direction"],
            }),
        },
        ToolSchema {
            name: "scroll_at".to_string(),
            description: "Scroll the element under a coordinate.".to_string(),
            parameters: coord_params(&[
                ("direction", direction),
                (
                    "magnitude",
                    serde_json::json!({"type": "number", "optional": true}),
                ),
            ]),
        },
        ToolSchema {
            name: "wait_5_seconds".to_string(),
            description: "Wait five seconds for the page to settle.".to_string(),
            parameters: empty.clone(),
        },
        ToolSchema {
            name: "go_back".to_string(),
            description: "Navigate back in history.".to_string(),
            parameters: empty.clone(),
        },
        ToolSchema {
            name: "go_forward".to_string(),
            description: "Navigate forward in history.".to_string(),
            parameters: empty,
        },
        ToolSchema {
            name: "navigate".to_string(),
            description: "Navigate directly to a URL.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"],
            }),
        },
        ToolSchema {
            name: "key_combination".to_string(),
            description: "Press a key combination, e.g. [\"Control\", \"a\"].".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"keys": {"type": "array", "items": {"type": "string"}}},
                "required": ["keys"],
            }),
        },
        ToolSchema {
            name: "drag_and_drop".to_string(),
            description: "Drag from one coordinate to another.".to_string(),
            parameters: coord_params(&[
                ("destination_x", serde_json::json!({"type": "number"})),
                ("destination_y", serde_json::json!({"type": "number"})),
            ]),
        },
    ]
}
