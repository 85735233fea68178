//! Intrinsic Builder (C2): typed constructors for ASL intrinsic
//! expressions, rendered to the canonical string form used inside
//! `Parameters` via `.$`-suffixed keys (e.g. `States.Format('{}', $.x)`).

use serde_json::Value as Json;

/// One argument to an intrinsic call: either another intrinsic, a JSON
/// Path, or a literal (serialized inline as a JSON-embedded constant).
#[derive(Debug, Clone, PartialEq)]
pub enum IntrinsicArg {
    Path(String),
    Literal(Json),
    Nested(Box<Intrinsic>),
}

impl IntrinsicArg {
    pub fn path(p: impl Into<String>) -> Self {
        IntrinsicArg::Path(p.into())
    }

    pub fn literal(v: Json) -> Self {
        IntrinsicArg::Literal(v)
    }
}

impl From<Intrinsic> for IntrinsicArg {
    fn from(i: Intrinsic) -> Self {
        IntrinsicArg::Nested(Box::new(i))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    /// `States.Format(fmt, ...args)`. `{}` placeholders in `fmt` are the
    /// only escape syntax.
    Format { format: String, args: Vec<IntrinsicArg> },
    Array(Vec<IntrinsicArg>),
    ArrayGetItem { array: Box<IntrinsicArg>, index: Box<IntrinsicArg> },
    ArrayLength(Box<IntrinsicArg>),
    ArrayRange { start: Box<IntrinsicArg>, end: Box<IntrinsicArg>, step: Box<IntrinsicArg> },
    ArrayContains { array: Box<IntrinsicArg>, element: Box<IntrinsicArg> },
    StringSplit { string: Box<IntrinsicArg>, separator: Box<IntrinsicArg> },
    JsonToString(Box<IntrinsicArg>),
    StringToJson(Box<IntrinsicArg>),
    JsonMerge { a: Box<IntrinsicArg>, b: Box<IntrinsicArg> },
    MathAdd { a: Box<IntrinsicArg>, b: Box<IntrinsicArg> },
}

impl Intrinsic {
    pub fn format(fmt: impl Into<String>, args: Vec<IntrinsicArg>) -> Self {
        Intrinsic::Format { format: fmt.into(), args }
    }

    pub fn array(items: Vec<IntrinsicArg>) -> Self {
        Intrinsic::Array(items)
    }

    pub fn array_get_item(array: IntrinsicArg, index: IntrinsicArg) -> Self {
        Intrinsic::ArrayGetItem { array: Box::new(array), index: Box::new(index) }
    }

    pub fn array_length(array: IntrinsicArg) -> Self {
        Intrinsic::ArrayLength(Box::new(array))
    }

    pub fn array_range(start: IntrinsicArg, end: IntrinsicArg, step: IntrinsicArg) -> Self {
        Intrinsic::ArrayRange { start: Box::new(start), end: Box::new(end), step: Box::new(step) }
    }

    pub fn array_contains(array: IntrinsicArg, element: IntrinsicArg) -> Self {
        Intrinsic::ArrayContains { array: Box::new(array), element: Box::new(element) }
    }

    pub fn string_split(string: IntrinsicArg, separator: IntrinsicArg) -> Self {
        Intrinsic::StringSplit { string: Box::new(string), separator: Box::new(separator) }
    }

    pub fn json_to_string(v: IntrinsicArg) -> Self {
        Intrinsic::JsonToString(Box::new(v))
    }

    pub fn string_to_json(v: IntrinsicArg) -> Self {
        Intrinsic::StringToJson(Box::new(v))
    }

    pub fn json_merge(a: IntrinsicArg, b: IntrinsicArg) -> Self {
        Intrinsic::JsonMerge { a: Box::new(a), b: Box::new(b) }
    }

    pub fn math_add(a: IntrinsicArg, b: IntrinsicArg) -> Self {
        Intrinsic::MathAdd { a: Box::new(a), b: Box::new(b) }
    }

    /// Renders the canonical ASL intrinsic string, e.g.
    /// `States.Format('{}', $.x)`.
    pub fn render(&self) -> String {
        match self {
            Intrinsic::Format { format, args } => {
                let rendered_args: Vec<String> = args.iter().map(render_arg).collect();
                let mut parts = vec![quote_string(format)];
                parts.extend(rendered_args);
                format!("States.Format({})", parts.join(", "))
            }
            Intrinsic::Array(items) => {
                let rendered: Vec<String> = items.iter().map(render_arg).collect();
                format!("States.Array({})", rendered.join(", "))
            }
            Intrinsic::ArrayGetItem { array, index } => {
                format!("States.ArrayGetItem({}, {})", render_arg(array), render_arg(index))
            }
            Intrinsic::ArrayLength(arr) => format!("States.ArrayLength({})", render_arg(arr)),
            Intrinsic::ArrayRange { start, end, step } => format!(
                "States.ArrayRange({}, {}, {})",
                render_arg(start),
                render_arg(end),
                render_arg(step)
            ),
            Intrinsic::ArrayContains { array, element } => {
                format!("States.ArrayContains({}, {})", render_arg(array), render_arg(element))
            }
            Intrinsic::StringSplit { string, separator } => {
                format!("States.StringSplit({}, {})", render_arg(string), render_arg(separator))
            }
            Intrinsic::JsonToString(v) => format!("States.JsonToString({})", render_arg(v)),
            Intrinsic::StringToJson(v) => format!("States.StringToJson({})", render_arg(v)),
            Intrinsic::JsonMerge { a, b } => {
                format!("States.JsonMerge({}, {}, false)", render_arg(a), render_arg(b))
            }
            Intrinsic::MathAdd { a, b } => format!("States.MathAdd({}, {})", render_arg(a), render_arg(b)),
        }
    }
}

fn render_arg(arg: &IntrinsicArg) -> String {
    match arg {
        IntrinsicArg::Path(p) => p.clone(),
        IntrinsicArg::Literal(v) => render_literal(v),
        IntrinsicArg::Nested(i) => format!("'{}'", i.render().replace('\'', "\\'")),
    }
}

fn render_literal(v: &Json) -> String {
    match v {
        Json::String(s) => quote_string(s),
        other => other.to_string(),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_renders_placeholders_and_path_args() {
        let i = Intrinsic::format("{}-{}", vec![IntrinsicArg::path("$.x"), IntrinsicArg::literal(json!(1))]);
        assert_eq!(i.render(), "States.Format('{}-{}', $.x, 1)");
    }

    #[test]
    fn array_get_item_renders() {
        let i = Intrinsic::array_get_item(IntrinsicArg::path("$.arr"), IntrinsicArg::literal(json!(0)));
        assert_eq!(i.render(), "States.ArrayGetItem($.arr, 0)");
    }

    #[test]
    fn nested_intrinsic_as_arg_is_quoted() {
        let inner = Intrinsic::math_add(IntrinsicArg::path("$.x"), IntrinsicArg::literal(json!(1)));
        let outer = Intrinsic::json_to_string(IntrinsicArg::from(inner));
        assert_eq!(outer.render(), "States.JsonToString('States.MathAdd($.x, 1)')");
    }

    #[test]
    fn string_literal_args_are_quoted() {
        let i = Intrinsic::array(vec![IntrinsicArg::literal(json!("a")), IntrinsicArg::literal(json!(2.0))]);
        assert_eq!(i.render(), "States.Array('a', 2.0)");
    }
}
