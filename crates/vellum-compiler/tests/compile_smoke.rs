use pretty_assertions::assert_eq;
use vellum_compiler::compile;
use vellum_token::{Token, TokenKind, UNSET};

fn kinds(toks: &[Token]) -> Vec<TokenKind> {
    toks.iter().map(|t| t.kind).collect()
}

/// Every `For` points at an `EndFor` that points back, on an arbitrarily
/// nested template.
#[test]
fn for_pairs_are_mutually_linked() {
    let src = "{{for a in xs}}1{{for b in ys}}2{{endfor}}3{{endfor}}";
    let toks = compile(src, "<test>").unwrap();
    for (i, t) in toks.iter().enumerate() {
        if t.kind == TokenKind::For {
            let end = t.ref1 as usize;
            assert_eq!(toks[end].kind, TokenKind::EndFor, "For at {i}");
            assert_eq!(toks[end].ref1, i as i64, "For at {i}");
        }
    }
}

/// Every `IfThen` points at an `EndIf`; an `Else`, when present, shares
/// the same `EndIf`.
#[test]
fn if_chains_are_fully_linked() {
    let src = "{{if a}}{{if b}}x{{else}}y{{endif}}{{endif}}";
    let toks = compile(src, "<test>").unwrap();
    for t in &toks {
        if t.kind == TokenKind::IfThen {
            assert_eq!(toks[t.ref2 as usize].kind, TokenKind::EndIf);
            if t.ref1 != UNSET {
                assert_eq!(toks[t.ref1 as usize].kind, TokenKind::Else);
                assert_eq!(toks[t.ref1 as usize].ref2, t.ref2);
            }
        }
    }
}

#[test]
fn vector_ends_with_exactly_one_eof() {
    for src in ["", "plain", "{{:v}}", "{{for i in xs}}{{endfor}}", "{{exit}}x"] {
        let toks = compile(src, "<test>").unwrap();
        let eofs = toks.iter().filter(|t| t.kind == TokenKind::Eof).count();
        assert_eq!(eofs, 1, "source: {src:?}");
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof, "source: {src:?}");
    }
}

#[test]
fn leading_token_is_the_system_version() {
    let toks = compile("x", "<test>").unwrap();
    assert_eq!(toks[0].kind, TokenKind::SystemVersion);
    assert_eq!(toks[0].value1, vellum_compiler::ENGINE_VERSION);
}

#[test]
fn options_can_suppress_the_version_token() {
    let toks = vellum_compiler::compile_with(
        "x",
        "<test>",
        vellum_compiler::CompileOptions {
            ignore_sys_version: true,
            parent_template: false,
        },
    )
    .unwrap();
    assert_eq!(
        kinds(&toks),
        vec![TokenKind::Content, TokenKind::Eof]
    );
}

#[test]
fn errors_carry_line_and_file() {
    let err = compile("ok line\nok line\n{{for}}", "pages/home.vlm").unwrap_err();
    assert_eq!(err.line, 3);
    assert_eq!(err.file, "pages/home.vlm");
    let msg = format!("{err}");
    assert!(msg.contains("pages/home.vlm:3"), "{msg}");
}

#[test]
fn error_peek_shows_the_offending_text() {
    let err = compile("{{:name | }}", "<test>").unwrap_err();
    assert!(!err.peek.is_empty());
}

#[test]
fn filter_chain_layout_matches_param_count() {
    let toks = compile("{{:v | substring, 2, 5}}", "<test>").unwrap();
    let v = toks.iter().position(|t| t.kind == TokenKind::Value).unwrap();
    assert_eq!(toks[v].ref1, 2);
    assert_eq!(toks[v + 1].kind, TokenKind::FilterName);
    assert_eq!(toks[v + 1].ref1, 2);
    assert_eq!(toks[v + 2].kind, TokenKind::FilterParameter);
    assert_eq!(toks[v + 3].kind, TokenKind::FilterParameter);
    assert_eq!(toks[v + 4].kind, TokenKind::Eof);
}

#[test]
fn crlf_and_lf_are_both_single_breaks() {
    let unix = compile("a\nb", "<test>").unwrap();
    let dos = compile("a\r\nb", "<test>").unwrap();
    assert_eq!(kinds(&unix), kinds(&dos));
}
