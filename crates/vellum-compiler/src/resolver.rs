//! Second pass: rewrite control-flow refs in place.
//!
//! Forward references (`For` → `EndFor`, `If` → `EndIf`, layout `Block` →
//! page override) are unknowable while the scanner emits tokens, so this
//! pass walks the finished vector once and cross-links everything by
//! index. After it runs the interpreter takes every branch in O(1).

use std::collections::HashMap;

use vellum_diagnostics::CompileError;
use vellum_token::{Token, TokenKind, BEGIN_OF_LAYOUT, END_OF_LAYOUT, UNSET};

/// Layout/page state machine driven by `Info` markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Unknown,
    Layout,
    Page,
}

pub fn resolve_jumps(tokens: &mut [Token], file: &str) -> Result<(), CompileError> {
    let mut for_stack: Vec<usize> = Vec::new();
    let mut continue_stack: Vec<usize> = Vec::new();
    // (IfThen index, Else index or UNSET)
    let mut if_stack: Vec<(usize, i64)> = Vec::new();
    // case-folded block name -> index of the layout definition
    let mut layout_blocks: HashMap<String, usize> = HashMap::new();
    let mut open_block: Option<usize> = None;
    let mut section = Section::Unknown;
    let mut exit_seen = false;

    for idx in 0..tokens.len() {
        match tokens[idx].kind {
            TokenKind::For => {
                if !continue_stack.is_empty() {
                    return Err(err(file, "continue stack corrupted", "for"));
                }
                for_stack.push(idx);
            }
            TokenKind::EndFor => {
                let f = match for_stack.pop() {
                    Some(f) => f,
                    None => return Err(err(file, "'endfor' without matching 'for'", "endfor")),
                };
                tokens[f].ref1 = idx as i64;
                tokens[idx].ref1 = f as i64;
                for c in continue_stack.drain(..) {
                    tokens[c].ref1 = idx as i64;
                }
            }
            TokenKind::Continue => continue_stack.push(idx),
            TokenKind::IfThen => if_stack.push((idx, UNSET)),
            TokenKind::Else => {
                let (i, _) = match if_stack.pop() {
                    Some(e) => e,
                    None => return Err(err(file, "'else' without matching 'if'", "else")),
                };
                if_stack.push((i, idx as i64));
            }
            TokenKind::EndIf => {
                let (i, e) = match if_stack.pop() {
                    Some(e) => e,
                    None => return Err(err(file, "'endif' without matching 'if'", "endif")),
                };
                tokens[i].ref1 = e;
                tokens[i].ref2 = idx as i64;
                if e >= 0 {
                    tokens[e as usize].ref2 = idx as i64;
                }
            }
            TokenKind::Exit => exit_seen = true,
            TokenKind::Info => {
                if tokens[idx].value1 == BEGIN_OF_LAYOUT {
                    section = Section::Layout;
                } else if tokens[idx].value1 == END_OF_LAYOUT {
                    section = Section::Page;
                }
            }
            TokenKind::Block => {
                if open_block.is_some() {
                    return Err(err(file, "'block' may not be nested", &tokens[idx].value1));
                }
                open_block = Some(idx);
                let name = tokens[idx].value1.to_ascii_lowercase();
                match section {
                    Section::Layout => {
                        if layout_blocks.contains_key(&name) {
                            return Err(err(
                                file,
                                format!("duplicate block '{}' in layout", tokens[idx].value1),
                                &tokens[idx].value1,
                            ));
                        }
                        layout_blocks.insert(name, idx);
                    }
                    // A page block overriding a known layout block becomes
                    // that block's jump target; unknown names are ignored.
                    Section::Page | Section::Unknown => {
                        if let Some(&layout_idx) = layout_blocks.get(&name) {
                            tokens[layout_idx].ref1 = idx as i64;
                        }
                    }
                }
            }
            TokenKind::EndBlock => {
                let b = match open_block.take() {
                    Some(b) => b,
                    None => {
                        return Err(err(file, "'endblock' without matching 'block'", "endblock"))
                    }
                };
                if section == Section::Layout {
                    tokens[b].ref2 = idx as i64;
                }
            }
            _ => {}
        }
    }

    if !exit_seen {
        if !for_stack.is_empty() {
            return Err(err(file, "'for' without matching 'endfor'", "for"));
        }
        if !if_stack.is_empty() {
            return Err(err(file, "'if' without matching 'endif'", "if"));
        }
        if !continue_stack.is_empty() {
            return Err(err(file, "'continue' outside of a 'for' loop", "continue"));
        }
        if open_block.is_some() {
            return Err(err(file, "'block' without matching 'endblock'", "block"));
        }
    }
    Ok(())
}

// Resolver errors have no source offset left to point at; the peek slot
// carries the offending directive instead.
fn err(file: &str, message: impl Into<String>, peek: &str) -> CompileError {
    CompileError::new(message, peek, 0, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[test]
    fn for_endfor_cross_link() {
        let toks = compile("{{for i in xs}}{{:i}}{{endfor}}", "<test>").unwrap();
        let f = toks.iter().position(|t| t.kind == TokenKind::For).unwrap();
        let e = toks
            .iter()
            .position(|t| t.kind == TokenKind::EndFor)
            .unwrap();
        assert_eq!(toks[f].ref1, e as i64);
        assert_eq!(toks[e].ref1, f as i64);
    }

    #[test]
    fn continue_points_at_endfor() {
        let toks = compile("{{for i in xs}}{{continue}}{{endfor}}", "<test>").unwrap();
        let c = toks
            .iter()
            .position(|t| t.kind == TokenKind::Continue)
            .unwrap();
        let e = toks
            .iter()
            .position(|t| t.kind == TokenKind::EndFor)
            .unwrap();
        assert_eq!(toks[c].ref1, e as i64);
    }

    #[test]
    fn if_else_endif_cross_link() {
        let toks = compile("{{if ok}}a{{else}}b{{endif}}", "<test>").unwrap();
        let i = toks
            .iter()
            .position(|t| t.kind == TokenKind::IfThen)
            .unwrap();
        let el = toks.iter().position(|t| t.kind == TokenKind::Else).unwrap();
        let ei = toks
            .iter()
            .position(|t| t.kind == TokenKind::EndIf)
            .unwrap();
        assert_eq!(toks[i].ref1, el as i64);
        assert_eq!(toks[i].ref2, ei as i64);
        assert_eq!(toks[el].ref2, ei as i64);
    }

    #[test]
    fn if_without_else_keeps_unset_ref1() {
        let toks = compile("{{if ok}}a{{endif}}", "<test>").unwrap();
        let i = toks
            .iter()
            .position(|t| t.kind == TokenKind::IfThen)
            .unwrap();
        assert_eq!(toks[i].ref1, UNSET);
        assert!(toks[i].ref2 > i as i64);
    }

    #[test]
    fn unbalanced_for_is_an_error() {
        let e = compile("{{for i in xs}}", "<test>").unwrap_err();
        assert!(e.message.contains("without matching 'endfor'"), "{}", e);
    }

    #[test]
    fn unbalanced_if_is_an_error() {
        let e = compile("{{if ok}}", "<test>").unwrap_err();
        assert!(e.message.contains("without matching 'endif'"), "{}", e);
    }

    #[test]
    fn dangling_endfor_is_an_error() {
        let e = compile("{{endfor}}", "<test>").unwrap_err();
        assert!(e.message.contains("'endfor' without"), "{}", e);
    }

    #[test]
    fn exit_disables_balance_checking() {
        assert!(compile("{{if ok}}{{exit}}", "<test>").is_ok());
    }

    #[test]
    fn continue_outside_for_is_an_error() {
        let e = compile("{{continue}}", "<test>").unwrap_err();
        assert!(e.message.contains("outside of a 'for'"), "{}", e);
    }

    #[test]
    fn nested_block_is_an_error() {
        let e = compile(
            "{{block \"a\"}}{{block \"b\"}}{{endblock}}{{endblock}}",
            "<test>",
        )
        .unwrap_err();
        assert!(e.message.contains("nested"), "{}", e);
    }

    #[test]
    fn standalone_page_blocks_resolve_without_refs() {
        let toks = compile("{{block \"t\"}}x{{endblock}}", "<test>").unwrap();
        let b = toks
            .iter()
            .position(|t| t.kind == TokenKind::Block)
            .unwrap();
        assert_eq!(toks[b].ref1, UNSET);
        assert_eq!(toks[b].ref2, UNSET);
    }
}
