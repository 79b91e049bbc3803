//! JavaScript snippets backing the Chromium driver.
//!
//! Elements are tracked in an in-page registry (`window.__docharvestRefs`);
//! an [`ElementRef`] is the index into that array. The registry is dropped by
//! the browser on navigation, which is what makes references session-scoped.
//!
//! ## Security: JS string encoding
//!
//! Every caller-provided value (selectors, typed text, attribute names) goes
//! through [`sanitize_js_string`] and is only ever placed inside a string
//! literal, never in a code position.

use serde_json::Value;

use super::{ElementRef, Selector};
use crate::error::{HarvestError, HarvestResult};

const REGISTRY: &str = "(window.__docharvestRefs = window.__docharvestRefs || [])";

/// Script that resolves a selector and returns registry indices.
///
/// Returns `null` when the scope element is stale.
pub fn find_script(selector: &Selector, scope: Option<ElementRef>) -> String {
    let scope_expr = match scope {
        Some(element) => format!("reg[{}]", element.raw()),
        None => "document".to_string(),
    };
    let collect = match selector {
        Selector::Css(css) => format!(
            "found = Array.from(scope.querySelectorAll('{}'));",
            sanitize_js_string(css)
        ),
        Selector::XPath(xpath) => format!(
            "const snap = document.evaluate('{}', scope, null, \
             XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                for (let i = 0; i < snap.snapshotLength; i++) {{ found.push(snap.snapshotItem(i)); }}",
            sanitize_js_string(xpath)
        ),
    };
    format!(
        r#"(() => {{
                const reg = {REGISTRY};
                const scope = {scope_expr};
                if (!scope || (scope !== document && !scope.isConnected)) {{ return null; }}
                let found = [];
                {collect}
                return found.map(el => {{
                    let idx = reg.indexOf(el);
                    if (idx < 0) {{ reg.push(el); idx = reg.length - 1; }}
                    return idx;
                }});
            }})()"#
    )
}

/// Script that runs `body` against a registered element.
///
/// `body` sees the element as `el` and may `return` a value, which is
/// reported as `{ ok: true, value }`.
pub fn element_script(element: ElementRef, body: &str) -> String {
    format!(
        r#"(() => {{
                const el = {REGISTRY}[{}];
                if (!el || !el.isConnected) {{ return {{ ok: false }}; }}
                const value = (() => {{ {body} }})();
                return {{ ok: true, value: value === undefined ? null : value }};
            }})()"#,
        element.raw()
    )
}

pub fn click_body() -> &'static str {
    "el.click();"
}

pub fn text_body() -> &'static str {
    "return (el.textContent || '').trim();"
}

pub fn attribute_body(name: &str) -> String {
    format!("return el.getAttribute('{}');", sanitize_js_string(name))
}

pub fn type_body(text: &str) -> String {
    format!(
        "el.focus();
         el.value = '{}';
         el.dispatchEvent(new Event('input', {{ bubbles: true }}));
         el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
        sanitize_js_string(text)
    )
}

pub fn submit_body() -> &'static str {
    "const form = el.form || el.closest('form');
     if (!form) { throw new Error('element is not inside a form'); }
     if (form.requestSubmit) { form.requestSubmit(); } else { form.submit(); }"
}

pub fn select_body(value: &str) -> String {
    format!(
        "el.value = '{}';
         el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
        sanitize_js_string(value)
    )
}

pub fn scroll_body() -> &'static str {
    "el.scrollIntoView({ block: 'center' });"
}

/// Interpret the reply of a [`find_script`].
pub fn parse_found(reply: Value) -> HarvestResult<Vec<ElementRef>> {
    match reply {
        Value::Null => Err(HarvestError::Driver("stale scope element".into())),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                item.as_u64()
                    .map(ElementRef::new)
                    .ok_or_else(|| HarvestError::Driver(format!("bad element index: {item}")))
            })
            .collect(),
        other => Err(HarvestError::Driver(format!("unexpected find reply: {other}"))),
    }
}

/// Interpret the reply of an [`element_script`].
pub fn parse_element_reply(reply: Value, element: ElementRef) -> HarvestResult<Value> {
    let ok = reply.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        return Err(HarvestError::Driver(format!(
            "stale element reference {}",
            element.raw()
        )));
    }
    Ok(reply.get("value").cloned().unwrap_or(Value::Null))
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes all characters that could break out of a JS string context:
/// - Backslashes, single/double quotes, backticks
/// - Newlines, carriage returns, tabs
/// - HTML script tags
/// - Null bytes
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_quotes_and_tags() {
        assert_eq!(sanitize_js_string("it's"), "it\\'s");
        let sanitized = sanitize_js_string("</script>");
        assert!(!sanitized.contains("</script>"));
        assert_eq!(sanitize_js_string("a\0b"), "ab");
    }

    #[test]
    fn test_password_never_breaks_literal() {
        let body = type_body("p'w\"d\n`");
        assert!(body.contains("el.value = 'p\\'w\\\"d\\n\\`';"));
    }

    #[test]
    fn test_find_script_css_and_xpath() {
        let css = find_script(&Selector::css("input#pin"), None);
        assert!(css.contains("querySelectorAll('input#pin')"));
        assert!(css.contains("const scope = document;"));

        let xpath = find_script(
            &Selector::xpath("//div[contains(@class, 'type-error')]"),
            Some(ElementRef::new(4)),
        );
        assert!(xpath.contains("document.evaluate('//div[contains(@class, \\'type-error\\')]'"));
        assert!(xpath.contains("const scope = reg[4];"));
    }

    #[test]
    fn test_parse_found() {
        let refs = parse_found(json!([0, 3])).unwrap();
        assert_eq!(refs, vec![ElementRef::new(0), ElementRef::new(3)]);
        assert!(parse_found(Value::Null).is_err());
        assert!(parse_found(json!(["x"])).is_err());
    }

    #[test]
    fn test_parse_element_reply() {
        let el = ElementRef::new(2);
        let value = parse_element_reply(json!({"ok": true, "value": "Kontoauszug"}), el).unwrap();
        assert_eq!(value, json!("Kontoauszug"));
        let err = parse_element_reply(json!({"ok": false}), el).unwrap_err();
        assert!(err.to_string().contains("stale element reference 2"));
    }
}
