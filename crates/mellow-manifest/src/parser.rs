use std::{ops::Range, sync::Arc};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{
    records::{Atom, FieldBag, RawField, RawRecord},
    CppBinary, CppLibrary, CppTest, ExternalPackage, GenRule, Os, Profile, Rule, SystemLib,
};

/// A manifest (or build-config) parse failure, rendered by `miette` with the
/// offending source line.
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct ParseError {
    message: String,
    #[source_code]
    source_code: NamedSource,
    #[label]
    span: Option<SourceSpan>,
}

impl ParseError {
    pub(crate) fn new(
        message: impl Into<String>,
        path: &Arc<str>,
        text: &Arc<str>,
        range: Option<Range<usize>>,
    ) -> Self {
        Self {
            message: message.into(),
            source_code: NamedSource::new(path.as_ref(), text.to_string()),
            span: range.map(|r| r.into()),
        }
    }
}

struct LineScanner<'a> {
    path: &'a Arc<str>,
    text: &'a Arc<str>,
}

impl<'a> LineScanner<'a> {
    fn err(&self, message: impl Into<String>, range: Range<usize>) -> ParseError {
        ParseError::new(message, self.path, self.text, Some(range))
    }

    /// Splits one line into atoms. Double quotes protect whitespace and `#`;
    /// `\"` and `\\` escape inside quotes; an unquoted `#` starts a comment.
    fn scan_atoms(&self, line: &str, line_offset: usize) -> Result<Vec<Atom>, ParseError> {
        let mut atoms = Vec::new();
        let mut chars = line.char_indices().peekable();
        while let Some(&(start, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            if c == '#' {
                break;
            }
            let mut text = String::new();
            let mut end = start;
            let quoted = c == '"';
            if quoted {
                chars.next();
                let mut closed = false;
                while let Some((ix, c)) = chars.next() {
                    end = ix + c.len_utf8();
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((ix2, escaped @ ('"' | '\\'))) => {
                                end = ix2 + escaped.len_utf8();
                                text.push(escaped);
                            }
                            _ => {
                                return Err(self.err(
                                    "unsupported escape in quoted value",
                                    line_offset + ix..line_offset + end,
                                ))
                            }
                        },
                        _ => text.push(c),
                    }
                }
                if !closed {
                    return Err(self.err(
                        "unterminated quoted value",
                        line_offset + start..line_offset + line.len(),
                    ));
                }
            } else {
                while let Some(&(ix, c)) = chars.peek() {
                    if c.is_whitespace() || c == '#' {
                        break;
                    }
                    chars.next();
                    end = ix + c.len_utf8();
                    text.push(c);
                }
            }
            atoms.push(Atom {
                text,
                range: line_offset + start..line_offset + end,
                quoted,
            });
        }
        Ok(atoms)
    }
}

/// Parses the untyped record layer: kind tags at indent zero, `key:` fields
/// below them, and further-indented continuation lines holding list items.
pub fn parse_records(
    path: &Arc<str>,
    text: &Arc<str>,
) -> Result<Vec<RawRecord>, ParseError> {
    let scanner = LineScanner { path, text };
    let mut records: Vec<RawRecord> = Vec::new();
    let mut field_indent: Option<usize> = None;

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_offset = offset;
        offset += line.len();
        let line = line.trim_end_matches(['\n', '\r']);

        let indent = line.len() - line.trim_start().len();
        let mut atoms = scanner.scan_atoms(line, line_offset)?;
        if atoms.is_empty() {
            continue;
        }

        let is_key = !atoms[0].quoted && atoms[0].text.ends_with(':') && atoms[0].text.len() > 1;
        if indent == 0 {
            if !is_key || atoms.len() != 1 {
                return Err(scanner.err(
                    "expected a record tag like 'cpp_library:'",
                    atoms[0].range.clone(),
                ));
            }
            let mut kind = atoms.remove(0);
            kind.text.pop();
            records.push(RawRecord {
                kind,
                fields: Vec::new(),
            });
            field_indent = None;
            continue;
        }

        let Some(record) = records.last_mut() else {
            return Err(scanner.err(
                "field appears before any record tag",
                atoms[0].range.clone(),
            ));
        };

        let starts_field = is_key && field_indent.map_or(true, |fi| indent <= fi);
        if starts_field {
            field_indent = Some(indent);
            let mut key = atoms.remove(0);
            key.text.pop();
            record.fields.push(RawField { key, atoms });
        } else {
            let Some(field) = record.fields.last_mut() else {
                return Err(scanner.err(
                    "continuation line without a field",
                    atoms[0].range.clone(),
                ));
            };
            field.atoms.append(&mut atoms);
        }
    }

    Ok(records)
}

/// Parses a manifest into typed rules carrying their source locations.
pub fn parse(path: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Result<Vec<Rule>, ParseError> {
    let path = path.into();
    let text = text.into();
    parse_records(&path, &text)?
        .into_iter()
        .map(|record| rule_from_record(record, &path, &text))
        .collect()
}

fn rule_from_record(
    record: RawRecord,
    path: &Arc<str>,
    text: &Arc<str>,
) -> Result<Rule, ParseError> {
    let kind = record.kind.clone();
    let mut bag = FieldBag::new(record, path, text);
    let location = bag.location();
    let rule = match kind.text.as_str() {
        "profile" => {
            let name = bag.scalar("name")?;
            let cpp_flags = bag.list("cpp_flags")?;
            let rule = Profile {
                name: bag.required("name", name)?,
                cpp_flags: bag.required("cpp_flags", cpp_flags)?,
                ld_flags: bag.list("ld_flags")?.unwrap_or_default(),
                cpp_compiler: bag.scalar("cpp_compiler")?.map(Into::into),
                location,
            };
            Rule::Profile(rule)
        }
        "cpp_binary" => {
            let name = bag.scalar("name")?;
            let libs = bag.list("libs")?;
            let rule = CppBinary {
                name: bag.required("name", name)?,
                sources: bag.list("sources")?.unwrap_or_default(),
                libs: bag.required("libs", libs)?,
                ld_flags: bag.list("ld_flags")?.unwrap_or_default(),
                cpp_flags: bag.list("cpp_flags")?.unwrap_or_default(),
                location,
            };
            Rule::CppBinary(rule)
        }
        "cpp_library" => {
            let name = bag.scalar("name")?;
            let rule = CppLibrary {
                name: bag.required("name", name)?,
                sources: bag.list("sources")?.unwrap_or_default(),
                headers: bag.list("headers")?.unwrap_or_default(),
                libs: bag.list("libs")?.unwrap_or_default(),
                ld_flags: bag.list("ld_flags")?.unwrap_or_default(),
                cpp_flags: bag.list("cpp_flags")?.unwrap_or_default(),
                location,
            };
            Rule::CppLibrary(rule)
        }
        "cpp_test" => {
            let name = bag.scalar("name")?;
            let sources = bag.list("sources")?;
            let output = bag.scalar("output")?;
            let os_filter = bag
                .list("os_filter")?
                .unwrap_or_default()
                .into_iter()
                .map(|os| {
                    Os::parse(&os).ok_or_else(|| {
                        ParseError::new(
                            format!("unknown os '{os}' (expected linux or macos)"),
                            path,
                            text,
                            Some(kind.range.clone()),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let rule = CppTest {
                name: bag.required("name", name)?,
                sources: bag.required("sources", sources)?,
                libs: bag.list("libs")?.unwrap_or_default(),
                output: bag.required("output", output)?,
                os_filter,
                location,
            };
            Rule::CppTest(rule)
        }
        "gen_rule" => {
            let name = bag.scalar("name")?;
            let binary = bag.scalar("binary")?;
            let outputs = bag.list("outputs")?;
            let rule = GenRule {
                name: bag.required("name", name)?,
                binary: bag.required("binary", binary)?,
                flags: bag.list("flags")?.unwrap_or_default(),
                data: bag.list("data")?.unwrap_or_default(),
                outputs: bag.required("outputs", outputs)?,
                output_to_src: bag.boolean("output_to_src")?.unwrap_or_default(),
                location,
            };
            Rule::GenRule(rule)
        }
        "system_lib" => {
            let name = bag.scalar("name")?;
            let command = bag.scalar("command")?;
            let provide_headers = bag.list("provide_headers")?;
            let rule = SystemLib {
                name: bag.required("name", name)?,
                command: bag.required("command", command)?.into(),
                flags: bag.list("flags")?.unwrap_or_default(),
                provide_headers: bag.required("provide_headers", provide_headers)?,
                location,
            };
            Rule::SystemLib(rule)
        }
        "external_package" => {
            let name = bag.scalar("name")?;
            let rule = ExternalPackage {
                name: bag.required("name", name)?,
                source: bag.scalar("source")?,
                url: bag.scalar("url")?,
                location,
            };
            Rule::ExternalPackage(rule)
        }
        other => {
            return Err(ParseError::new(
                format!("unknown rule kind '{other}'"),
                path,
                text,
                Some(kind.range),
            ))
        }
    };
    bag.finish()?;
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_ok(text: &str) -> Vec<Rule> {
        parse("mbuild", text).unwrap()
    }

    fn parse_err(text: &str) -> String {
        parse("mbuild", text).unwrap_err().to_string()
    }

    #[test]
    fn parses_a_library() {
        let rules = parse_ok(
            "cpp_library:\n  name: blake\n  sources:\n    blake.cpp\n  headers:\n    blake.hpp\n  libs:\n    /base/bytes\n",
        );
        assert_eq!(rules.len(), 1);
        let Rule::CppLibrary(lib) = &rules[0] else {
            panic!("expected a cpp_library");
        };
        assert_eq!(lib.name, "blake");
        assert_eq!(lib.sources, vec!["blake.cpp"]);
        assert_eq!(lib.headers, vec!["blake.hpp"]);
        assert_eq!(lib.libs, vec!["/base/bytes"]);
        assert!(lib.location.range.is_some());
    }

    #[test]
    fn inline_value_is_single_element_list() {
        let rules = parse_ok("cpp_library:\n  name: x\n  sources: x.cpp\n");
        let Rule::CppLibrary(lib) = &rules[0] else {
            panic!();
        };
        assert_eq!(lib.sources, vec!["x.cpp"]);
    }

    #[test]
    fn quoted_atoms_keep_spaces_and_hashes() {
        let rules = parse_ok("profile:\n  name: default\n  cpp_flags:\n    \"-DGREETING=\\\"hi there\\\"\"\n    \"-D#\"\n");
        let Rule::Profile(p) = &rules[0] else {
            panic!();
        };
        assert_eq!(p.cpp_flags, vec!["-DGREETING=\"hi there\"", "-D#"]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let rules = parse_ok(
            "# top\n\ncpp_binary:\n  name: tool # trailing\n  libs:\n    # none yet\n    /a\n",
        );
        let Rule::CppBinary(b) = &rules[0] else {
            panic!();
        };
        assert_eq!(b.name, "tool");
        assert_eq!(b.libs, vec!["/a"]);
    }

    #[test]
    fn multiple_records() {
        let rules = parse_ok(
            "profile:\n  name: default\n  cpp_flags:\n\ncpp_library:\n  name: a\n",
        );
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].kind(), "profile");
        assert_eq!(rules[1].kind(), "cpp_library");
    }

    #[test]
    fn missing_required_field() {
        let err = parse_err("cpp_binary:\n  name: tool\n");
        assert!(err.contains("'libs' not defined"), "{err}");
    }

    #[test]
    fn duplicate_field() {
        let err = parse_err("cpp_library:\n  name: a\n  name: b\n");
        assert!(err.contains("more than once"), "{err}");
    }

    #[test]
    fn unknown_field_and_kind() {
        let err = parse_err("cpp_library:\n  name: a\n  nope: b\n");
        assert!(err.contains("no field 'nope'"), "{err}");
        let err = parse_err("mystery:\n  name: a\n");
        assert!(err.contains("unknown rule kind 'mystery'"), "{err}");
    }

    #[test]
    fn field_before_record_is_an_error() {
        let err = parse_err("  name: a\n");
        assert!(err.contains("before any record"), "{err}");
    }

    #[test]
    fn os_filter_parses_and_rejects() {
        let rules = parse_ok(
            "cpp_test:\n  name: t\n  sources:\n    t.cpp\n  output: t.out\n  os_filter:\n    linux\n",
        );
        let Rule::CppTest(t) = &rules[0] else {
            panic!();
        };
        assert_eq!(t.os_filter, vec![Os::Linux]);

        let err = parse_err(
            "cpp_test:\n  name: t\n  sources:\n    t.cpp\n  output: t.out\n  os_filter:\n    beos\n",
        );
        assert!(err.contains("unknown os 'beos'"), "{err}");
    }

    #[test]
    fn gen_rule_with_bool() {
        let rules = parse_ok(
            "gen_rule:\n  name: g\n  binary: gen\n  outputs:\n    out.hpp\n  output_to_src: true\n",
        );
        let Rule::GenRule(g) = &rules[0] else {
            panic!();
        };
        assert!(g.output_to_src);
    }

    #[test]
    fn empty_list_field_is_allowed() {
        let rules = parse_ok("profile:\n  name: default\n  cpp_flags:\n");
        let Rule::Profile(p) = &rules[0] else {
            panic!();
        };
        assert!(p.cpp_flags.is_empty());
    }
}
