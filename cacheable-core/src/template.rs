//! # Key Templates
//!
//! Cache keys are derived from a template string evaluated against the call's
//! positional arguments and an optional bound context.
//!
//! ## Placeholder syntax
//!
//! | Placeholder    | Resolves to                                               |
//! |----------------|-----------------------------------------------------------|
//! | `{N}`, `{argN}`| the N-th positional argument                              |
//! | `{*}`          | all positional arguments as a JSON array                  |
//! | `{this.a.b}`   | field `a.b` of the bound context                          |
//! | `{name}`       | declared parameter `name`, falling back to `context.name` |
//! | `{_fn_}`       | name of the wrapped function                              |
//! | `{_id_}`       | identifier of the calling instance (instance methods)     |
//!
//! Prefixing a placeholder with `%j` renders the resolved value as canonical
//! JSON (object keys sorted), otherwise strings are substituted raw and other
//! values in their compact JSON form.
//!
//! A placeholder that cannot be resolved renders as the empty string. Rendering
//! never fails.
//!
//! ```
//! use cacheable_core::template::render;
//! use serde_json::json;
//!
//! let key = render("foor-{0}-{1}", &[json!(2), json!(5)], None);
//! assert_eq!(key, "foor-2-5");
//!
//! let ctx = json!({ "hello": "abc", "again": "def" });
//! let key = render("contexted-{hello}-{this.hello}-{this.again}", &[json!(1)], Some(&ctx));
//! assert_eq!(key, "contexted-abc-abc-def");
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt::Write;

/// Template used by [`crate::Cacheable::wrap`] when none is given.
pub const DEFAULT_TEMPLATE: &str = "{_fn_}:%j{0}";

/// Default template for cached static methods.
pub const DEFAULT_STATIC_TEMPLATE: &str = "{_fn_}:%j{*}";

/// Default template for cached instance methods.
pub const DEFAULT_INSTANCE_TEMPLATE: &str = "{_fn_}#{_id_}:%j{*}";

pub(crate) static DEFAULT: Lazy<KeyTemplate> = Lazy::new(|| KeyTemplate::parse(DEFAULT_TEMPLATE));
pub(crate) static DEFAULT_STATIC: Lazy<KeyTemplate> =
    Lazy::new(|| KeyTemplate::parse(DEFAULT_STATIC_TEMPLATE));
pub(crate) static DEFAULT_INSTANCE: Lazy<KeyTemplate> =
    Lazy::new(|| KeyTemplate::parse(DEFAULT_INSTANCE_TEMPLATE));

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Index(usize),
    AllArgs,
    Function,
    InstanceId,
    This(Vec<String>),
    Name(String),
}

impl Token {
    fn parse(raw: &str) -> Token {
        if let Ok(index) = raw.parse::<usize>() {
            return Token::Index(index);
        }
        if let Some(index) = raw.strip_prefix("arg").and_then(|n| n.parse::<usize>().ok()) {
            return Token::Index(index);
        }
        match raw {
            "*" => Token::AllArgs,
            "_fn_" => Token::Function,
            "_id_" => Token::InstanceId,
            "this" => Token::This(Vec::new()),
            _ => match raw.strip_prefix("this.") {
                Some(path) => Token::This(path.split('.').map(str::to_string).collect()),
                None => Token::Name(raw.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { token: Token, json: bool, raw: String },
}

/// A parsed key template.
///
/// Parsing is done once, at wrap or enable time, so each call only walks the
/// segment list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// Parses a template string. Any string is a valid template: braces that
    /// do not form a placeholder are kept as literal text.
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = match after.find(['{', '}']) {
                Some(pos) if after.as_bytes()[pos] == b'}' && pos > 0 => pos,
                // `{}`, `{{` or an unterminated brace: keep the brace literally
                _ => {
                    literal.push_str(&rest[..=open]);
                    rest = after;
                    continue;
                }
            };

            let mut head = &rest[..open];
            let json = head.ends_with("%j");
            if json {
                head = &head[..head.len() - 2];
            }
            literal.push_str(head);
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let raw = after[..close].trim();
            segments.push(Segment::Placeholder {
                token: Token::parse(raw),
                json,
                raw: raw.to_string(),
            });
            rest = &after[close + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    /// The template string this was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template references the calling instance (`{_id_}`).
    pub fn uses_instance_id(&self) -> bool {
        self.segments.iter().any(|segment| {
            matches!(
                segment,
                Segment::Placeholder {
                    token: Token::InstanceId,
                    ..
                }
            )
        })
    }

    /// Renders the key for one call.
    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        let mut key = String::with_capacity(self.source.len() + 16);

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Placeholder { token, json, raw } => match ctx.resolve(token) {
                    Some(value) if *json => write_canonical(&mut key, &value),
                    Some(value) => write_plain(&mut key, &value),
                    None => {
                        if !ctx.silent {
                            tracing::warn!(
                                template = %self.source,
                                placeholder = %raw,
                                "unresolved cache key placeholder, substituting empty string"
                            );
                        }
                    }
                },
            }
        }

        key
    }
}

impl Default for KeyTemplate {
    fn default() -> Self {
        DEFAULT.clone()
    }
}

impl From<&str> for KeyTemplate {
    fn from(source: &str) -> Self {
        KeyTemplate::parse(source)
    }
}

impl From<String> for KeyTemplate {
    fn from(source: String) -> Self {
        KeyTemplate::parse(&source)
    }
}

/// Everything a template can reference while rendering one call.
#[derive(Clone, Copy, Debug)]
pub struct RenderContext<'a> {
    pub function: &'a str,
    pub args: &'a [Value],
    pub params: &'a [String],
    pub context: Option<&'a Value>,
    pub instance_id: Option<&'a str>,
    pub silent: bool,
}

impl<'a> RenderContext<'a> {
    /// A silent context over the given positional arguments.
    pub fn new(args: &'a [Value]) -> Self {
        Self {
            function: "",
            args,
            params: &[],
            context: None,
            instance_id: None,
            silent: true,
        }
    }

    pub fn function(mut self, function: &'a str) -> Self {
        self.function = function;
        self
    }

    pub fn params(mut self, params: &'a [String]) -> Self {
        self.params = params;
        self
    }

    pub fn context(mut self, context: Option<&'a Value>) -> Self {
        self.context = context;
        self
    }

    pub fn instance_id(mut self, instance_id: Option<&'a str>) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    fn resolve(&self, token: &Token) -> Option<Cow<'a, Value>> {
        match token {
            Token::Index(index) => self.args.get(*index).map(Cow::Borrowed),
            Token::AllArgs => Some(Cow::Owned(Value::Array(self.args.to_vec()))),
            Token::Function => Some(Cow::Owned(Value::String(self.function.to_string()))),
            Token::InstanceId => self
                .instance_id
                .map(|id| Cow::Owned(Value::String(id.to_string()))),
            Token::This(path) => lookup(self.context?, path).map(Cow::Borrowed),
            // declared parameters win over the bound context
            Token::Name(name) => match self.params.iter().position(|p| p == name) {
                Some(index) => self.args.get(index).map(Cow::Borrowed),
                None => self.context?.get(name.as_str()).map(Cow::Borrowed),
            },
        }
    }
}

fn lookup<'v>(mut value: &'v Value, path: &[String]) -> Option<&'v Value> {
    for field in path {
        value = match value {
            Value::Object(map) => map.get(field)?,
            Value::Array(items) => items.get(field.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

fn write_plain(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(_) | Value::Object(_) => write_canonical(out, value),
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

/// Writes `value` as compact JSON with object keys in sorted order,
/// independent of how the map was built.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(name.clone()));
                write_canonical(out, item);
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

/// Renders `template` against `args` and an optional bound `context`.
///
/// Unresolved placeholders render silently as the empty string.
pub fn render(template: &str, args: &[Value], context: Option<&Value>) -> String {
    KeyTemplate::parse(template).render(&RenderContext::new(args).context(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_positional() {
        assert_eq!(render("foor-{0}-{1}", &[json!(2), json!(5)], None), "foor-2-5");
        assert_eq!(render("{arg1}/{arg0}", &[json!("a"), json!("b")], None), "b/a");
    }

    #[test]
    fn test_default_template_shape() {
        let args = [json!({ "a": 1 })];
        let key = DEFAULT.render(&RenderContext::new(&args).function("foo"));
        assert_eq!(key, r#"foo:{"a":1}"#);
    }

    #[test]
    fn test_context_and_bare_names() {
        let ctx = json!({ "hello": "abc", "again": "def" });
        let args = [json!(1), json!(2)];
        assert_eq!(
            render(
                "contexted-{hello}-{this.hello}-{this.again}",
                &args,
                Some(&ctx)
            ),
            "contexted-abc-abc-def"
        );
    }

    #[test]
    fn test_declared_params_take_precedence_over_context() {
        let ctx = json!({ "id": "from-context" });
        let args = [json!(42)];
        let params = vec!["id".to_string()];
        let template = KeyTemplate::parse("user:{id}");
        let key = template.render(&RenderContext::new(&args).params(&params).context(Some(&ctx)));
        assert_eq!(key, "user:42");

        let key = template.render(&RenderContext::new(&args).context(Some(&ctx)));
        assert_eq!(key, "user:from-context");
    }

    #[test]
    fn test_json_modifier_sorts_keys() {
        let args = [json!({ "b": [1, { "z": true, "a": null }], "a": "x" })];
        assert_eq!(
            render("%j{0}", &args, None),
            r#"{"a":"x","b":[1,{"a":null,"z":true}]}"#
        );
        assert_eq!(render("%j{0}", &[json!("abc")], None), r#""abc""#);
        assert_eq!(render("{0}", &[json!("abc")], None), "abc");
    }

    #[test]
    fn test_unresolved_is_empty() {
        assert_eq!(render("a-{3}-{this.x}-{nope}-b", &[json!(1)], None), "a----b");
        assert_eq!(render("%j{0}", &[], None), "");
    }

    #[test]
    fn test_literal_braces() {
        assert_eq!(render("{}", &[], None), "{}");
        assert_eq!(render("x{0", &[json!(1)], None), "x{0");
        assert_eq!(render("{{0}", &[json!(1)], None), "{1");
        assert_eq!(render("50%j", &[], None), "50%j");
    }

    #[test]
    fn test_nested_context_path() {
        let ctx = json!({ "user": { "id": 7, "tags": ["x", "y"] } });
        assert_eq!(render("{this.user.id}-{this.user.tags.1}", &[], Some(&ctx)), "7-y");
    }

    #[test]
    fn test_reserved_tokens() {
        let args = [json!(1), json!("two")];
        let template = KeyTemplate::parse(DEFAULT_INSTANCE_TEMPLATE);
        assert!(template.uses_instance_id());
        let key = template.render(
            &RenderContext::new(&args)
                .function("User.articles")
                .instance_id(Some("3")),
        );
        assert_eq!(key, r#"User.articles#3:[1,"two"]"#);
    }

    /// Collects everything a `fmt` subscriber writes.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn logged(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_unresolved_warns_unless_silent() {
        let template = KeyTemplate::parse("user:{missing}");
        let args = [json!(1)];

        let output = logged(|| {
            assert_eq!(template.render(&RenderContext::new(&args).silent(false)), "user:");
        });
        assert_eq!(output.matches("unresolved cache key placeholder").count(), 1);
        assert!(output.contains("missing"));

        let output = logged(|| {
            assert_eq!(template.render(&RenderContext::new(&args).silent(true)), "user:");
        });
        assert!(output.is_empty());

        // resolved placeholders never warn
        let output = logged(|| {
            KeyTemplate::parse("user:{0}").render(&RenderContext::new(&args).silent(false));
        });
        assert!(output.is_empty());
    }

    #[test]
    fn test_render_is_pure() {
        let args = [json!([1, 2])];
        let first = render("k:{0}", &args, None);
        let second = render("k:{0}", &args, None);
        assert_eq!(first, second);
        assert_eq!(first, "k:[1,2]");
    }
}
