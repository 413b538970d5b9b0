use std::fmt::Write as _;

use crate::Rule;

/// Serializes rules to the canonical manifest text: records separated by a
/// blank line, two-space field indent, list items one per line. Parsing the
/// result reproduces the rules, so `format --check-only` can compare bytes.
pub fn write(rules: &[Rule]) -> String {
    let mut out = String::new();
    for (ix, rule) in rules.iter().enumerate() {
        if ix > 0 {
            out.push('\n');
        }
        write_record(&mut out, rule);
    }
    out
}

pub fn write_record(out: &mut String, rule: &Rule) {
    let _ = writeln!(out, "{}:", rule.kind());
    match rule {
        Rule::Profile(r) => {
            scalar(out, "name", &r.name);
            list(out, "cpp_flags", &r.cpp_flags);
            if !r.ld_flags.is_empty() {
                list(out, "ld_flags", &r.ld_flags);
            }
            if let Some(compiler) = &r.cpp_compiler {
                scalar(out, "cpp_compiler", compiler.as_str());
            }
        }
        Rule::CppBinary(r) => {
            scalar(out, "name", &r.name);
            if !r.sources.is_empty() {
                list(out, "sources", &r.sources);
            }
            list(out, "libs", &r.libs);
            if !r.ld_flags.is_empty() {
                list(out, "ld_flags", &r.ld_flags);
            }
            if !r.cpp_flags.is_empty() {
                list(out, "cpp_flags", &r.cpp_flags);
            }
        }
        Rule::CppLibrary(r) => {
            scalar(out, "name", &r.name);
            if !r.sources.is_empty() {
                list(out, "sources", &r.sources);
            }
            if !r.headers.is_empty() {
                list(out, "headers", &r.headers);
            }
            if !r.libs.is_empty() {
                list(out, "libs", &r.libs);
            }
            if !r.ld_flags.is_empty() {
                list(out, "ld_flags", &r.ld_flags);
            }
            if !r.cpp_flags.is_empty() {
                list(out, "cpp_flags", &r.cpp_flags);
            }
        }
        Rule::CppTest(r) => {
            scalar(out, "name", &r.name);
            list(out, "sources", &r.sources);
            if !r.libs.is_empty() {
                list(out, "libs", &r.libs);
            }
            scalar(out, "output", &r.output);
            if !r.os_filter.is_empty() {
                let names: Vec<String> = r.os_filter.iter().map(|os| os.to_string()).collect();
                list(out, "os_filter", &names);
            }
        }
        Rule::GenRule(r) => {
            scalar(out, "name", &r.name);
            scalar(out, "binary", &r.binary);
            if !r.flags.is_empty() {
                list(out, "flags", &r.flags);
            }
            if !r.data.is_empty() {
                list(out, "data", &r.data);
            }
            list(out, "outputs", &r.outputs);
            if r.output_to_src {
                scalar(out, "output_to_src", "true");
            }
        }
        Rule::SystemLib(r) => {
            scalar(out, "name", &r.name);
            scalar(out, "command", r.command.as_str());
            if !r.flags.is_empty() {
                list(out, "flags", &r.flags);
            }
            list(out, "provide_headers", &r.provide_headers);
        }
        Rule::ExternalPackage(r) => {
            scalar(out, "name", &r.name);
            if let Some(source) = &r.source {
                scalar(out, "source", source);
            }
            if let Some(url) = &r.url {
                scalar(out, "url", url);
            }
        }
    }
}

fn scalar(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "  {key}: {}", quote(value));
}

fn list(out: &mut String, key: &str, values: &[String]) {
    let _ = writeln!(out, "  {key}:");
    for value in values {
        let _ = writeln!(out, "    {}", quote(value));
    }
}

/// Quotes an atom when the plain form would not re-parse to the same text.
pub fn quote(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '#' || c == '"')
        || value.ends_with(':');
    if !needs_quoting {
        return value.to_owned();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{parse, write, CppLibrary, Os, Rule};

    #[test]
    fn writes_canonical_library() {
        let rule = Rule::CppLibrary(CppLibrary {
            name: "blake".into(),
            sources: vec!["blake.cpp".into()],
            headers: vec!["blake.hpp".into()],
            libs: vec!["/base/bytes".into()],
            ..Default::default()
        });
        assert_eq!(
            write(&[rule]),
            "cpp_library:\n  name: blake\n  sources:\n    blake.cpp\n  headers:\n    blake.hpp\n  libs:\n    /base/bytes\n"
        );
    }

    #[test]
    fn written_text_reparses_to_the_same_rules() {
        let text = "profile:\n  name: default\n  cpp_flags:\n    -Wall\n    \"-DGREETING=\\\"hi\\\"\"\n\ncpp_test:\n  name: t\n  sources:\n    t.cpp\n  output: t.out\n  os_filter:\n    linux\n";
        let rules = parse("mbuild", text).unwrap();
        let written = write(&rules);
        let reparsed = parse("mbuild", written.clone()).unwrap();
        // Locations differ; compare the written forms instead.
        assert_eq!(write(&reparsed), written);
        let Rule::CppTest(t) = &reparsed[1] else {
            panic!();
        };
        assert_eq!(t.os_filter, vec![Os::Linux]);
    }

    #[test]
    fn writer_is_stable_for_parsed_input() {
        // Already-canonical text roundtrips byte for byte.
        let text = "cpp_binary:\n  name: tool\n  sources:\n    tool.cpp\n  libs:\n    /a\n";
        let rules = parse("mbuild", text).unwrap();
        assert_eq!(write(&rules), text);
    }
}
