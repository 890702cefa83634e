//! Feature detection.
//!
//! Builds a `Modernizr`-compatible detection script containing only the tests
//! the staged stylesheets and scripts actually use. Scripts reference a test
//! as `Modernizr.<name>`, stylesheets through the `.<name>` / `.no-<name>`
//! classes the script puts on the document element.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::fs;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::Environment;
use crate::engine::{Outcome, TaskResult};
use crate::io;

/// Known tests, by name, with the expression evaluating them in a browser.
/// `prop(name)` checks for a style property with or without vendor prefix.
static CATALOGUE: &[(&str, &str)] = &[
    ("backgroundsize", "prop('backgroundSize')"),
    ("borderradius", "prop('borderRadius')"),
    ("boxshadow", "prop('boxShadow')"),
    ("canvas", "!!document.createElement('canvas').getContext"),
    ("cssanimations", "prop('animationName')"),
    ("cssgrid", "prop('gridTemplateColumns')"),
    ("csstransforms", "prop('transform')"),
    ("csstransforms3d", "prop('perspective')"),
    ("csstransitions", "prop('transition')"),
    ("flexbox", "prop('flexBasis')"),
    ("flexwrap", "prop('flexWrap')"),
    ("history", "!!(window.history && history.pushState)"),
    (
        "inlinesvg",
        "(function () { var d = document.createElement('div'); d.innerHTML = '<svg/>'; \
         return (d.firstChild && d.firstChild.namespaceURI) == 'http://www.w3.org/2000/svg'; })()",
    ),
    ("json", "'JSON' in window && 'parse' in JSON"),
    (
        "localstorage",
        "(function () { try { localStorage.setItem('modernizr', 'x'); \
         localStorage.removeItem('modernizr'); return true; } catch (e) { return false; } })()",
    ),
    ("objectfit", "prop('objectFit')"),
    ("opacity", "prop('opacity')"),
    ("placeholder", "'placeholder' in document.createElement('input')"),
    (
        "sessionstorage",
        "(function () { try { sessionStorage.setItem('modernizr', 'x'); \
         sessionStorage.removeItem('modernizr'); return true; } catch (e) { return false; } })()",
    ),
    (
        "svg",
        "!!document.createElementNS && \
         !!document.createElementNS('http://www.w3.org/2000/svg', 'svg').createSVGRect",
    ),
    (
        "touchevents",
        "('ontouchstart' in window) || !!(window.DocumentTouch && document instanceof DocumentTouch)",
    ),
];

static SCRIPT_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bModernizr\.([a-zA-Z][a-zA-Z0-9]*)")
        .unwrap_or_else(|e| panic!("invalid script pattern: {e}"))
});

static STYLE_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(?:no-)?([a-z][a-z0-9-]*)").unwrap_or_else(|e| panic!("invalid style pattern: {e}"))
});

/// Parts of a stylesheet that can hold dots without being a selector.
static STYLE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)/\*.*?\*/|url\([^)]*\)|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#)
        .unwrap_or_else(|e| panic!("invalid style noise pattern: {e}"))
});

fn lookup(name: &str) -> Option<&'static str> {
    CATALOGUE
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(known, _)| *known)
}

/// Tests referenced by the given script and stylesheet sources.
pub fn referenced<S: AsRef<str>>(scripts: &[S], styles: &[S]) -> BTreeSet<&'static str> {
    let mut found = BTreeSet::new();

    for script in scripts {
        for caps in SCRIPT_USE.captures_iter(script.as_ref()) {
            if let Some(name) = caps.get(1).and_then(|m| lookup(m.as_str())) {
                found.insert(name);
            }
        }
    }

    for style in styles {
        let style = STYLE_NOISE.replace_all(style.as_ref(), " ");
        for caps in STYLE_USE.captures_iter(&style) {
            if let Some(name) = caps.get(1).and_then(|m| lookup(m.as_str())) {
                found.insert(name);
            }
        }
    }

    found
}

/// The detection script for a set of tests.
pub fn render(names: &BTreeSet<&'static str>) -> String {
    let list: Vec<_> = names.iter().copied().collect();

    let mut tests = String::new();
    for (name, expression) in CATALOGUE.iter().filter(|(name, _)| names.contains(name)) {
        let _ = writeln!(tests, "    {name}: function () {{ return {expression}; }},");
    }

    format!(
        r#"/*! canham feature detection: {list} */
;(function (window, document) {{
  var root = document.documentElement;
  var el = document.createElement('modernizr');
  function prop(name) {{
    var cap = name.charAt(0).toUpperCase() + name.slice(1);
    return [name, 'Webkit' + cap, 'Moz' + cap, 'ms' + cap].some(function (p) {{
      return p in el.style;
    }});
  }}
  var tests = {{
{tests}  }};
  var Modernizr = window.Modernizr || {{}};
  var classes = [];
  for (var name in tests) {{
    var ok = false;
    try {{ ok = !!tests[name](); }} catch (e) {{}}
    Modernizr[name] = ok;
    classes.push((ok ? '' : 'no-') + name);
  }}
  root.className = root.className.replace(/(^|\s)no-js(\s|$)/, '$1js$2') +
    (classes.length ? ' ' + classes.join(' ') : '');
  window.Modernizr = Modernizr;
}})(window, document);
"#,
        list = list.join(", "),
    )
}

/// Scan the staged output and write the tailored detection script.
pub fn build(env: &Environment) -> TaskResult {
    let staging = env.staging();
    let output = &env.config.features.output;

    let mut scripts = Vec::new();
    let mut styles = Vec::new();

    for rel in io::files(&staging)? {
        if &rel == output {
            continue;
        }
        match rel.extension() {
            Some("js") => scripts.push(fs::read_to_string(staging.join(&rel))?),
            Some("css") => styles.push(fs::read_to_string(staging.join(&rel))?),
            _ => {}
        }
    }

    let names = referenced(&scripts, &styles);
    tracing::info!(features = ?names, "building feature detection");

    io::write(staging.join(output), render(&names))?;
    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_referenced_tests() {
        let scripts = ["if (Modernizr.touchevents) { init(); } Modernizr.unknownthing;"];
        let styles = [".no-flexbox .row { float: left; } .flexbox-item { order: 1; } .svg img {}"];

        let names = referenced(&scripts, &styles);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["flexbox", "svg", "touchevents"]
        );
    }

    #[test]
    fn test_lookalike_classes_ignored() {
        let styles = [".flexbox-item {} .svgs {} a { transition: opacity 0.5s; }"];
        assert!(referenced::<&str>(&[], &styles).is_empty());
    }

    #[test]
    fn test_urls_strings_and_comments_ignored() {
        let styles = [
            ".logo { background: url(../images/logo.svg); }\n\
             .data { background: url(\"a.json\"); }\n\
             .icon::after { content: \"file.svg\"; }\n\
             /* see .flexbox below */ .grid { display: grid; }",
        ];
        assert!(referenced::<&str>(&[], &styles).is_empty());

        let styles = [".logo { background: url(a.svg) } .no-svg .logo { background: url(a.png) }"];
        assert_eq!(referenced::<&str>(&[], &styles), BTreeSet::from(["svg"]));
    }

    #[test]
    fn test_render_contains_only_selected() {
        let names = BTreeSet::from(["csstransforms", "history"]);
        let script = render(&names);

        assert!(script.contains("csstransforms: function"));
        assert!(script.contains("history: function"));
        assert!(!script.contains("flexbox"));
        assert!(!script.contains("touchevents"));
        assert!(script.contains("window.Modernizr = Modernizr;"));
    }

    #[test]
    fn test_render_empty() {
        let script = render(&BTreeSet::new());
        assert!(script.contains("var tests = {\n  };"));
    }
}
