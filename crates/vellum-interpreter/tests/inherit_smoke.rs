use std::fs;

use pretty_assertions::assert_eq;
use vellum_interpreter::Template;

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

fn render_file(path: &str) -> String {
    let mut t = match Template::compile_file(path) {
        Ok(t) => t,
        Err(e) => panic!("compile failed: {e}"),
    };
    t.render().unwrap()
}

#[test]
fn child_block_overrides_layout_block() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "layout.vlm", "[{{block \"t\"}}PARENT{{endblock}}]");
    let child = write(
        &dir,
        "page.vlm",
        "{{extends \"layout.vlm\"}}{{block \"t\"}}CHILD{{endblock}}",
    );
    assert_eq!(render_file(&child), "[CHILD]");
}

#[test]
fn unoverridden_layout_block_renders_in_place() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "layout.vlm", "[{{block \"t\"}}PARENT{{endblock}}]");
    let child = write(&dir, "page.vlm", "{{extends \"layout.vlm\"}}");
    assert_eq!(render_file(&child), "[PARENT]");
}

#[test]
fn several_blocks_override_independently() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir,
        "layout.vlm",
        "<{{block \"head\"}}H{{endblock}}|{{block \"body\"}}B{{endblock}}>",
    );
    let child = write(
        &dir,
        "page.vlm",
        "{{extends \"layout.vlm\"}}{{block \"body\"}}OVERRIDE{{endblock}}",
    );
    assert_eq!(render_file(&child), "<H|OVERRIDE>");
}

#[test]
fn block_names_match_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "layout.vlm", "[{{block \"Main\"}}P{{endblock}}]");
    let child = write(
        &dir,
        "page.vlm",
        "{{extends \"layout.vlm\"}}{{block \"MAIN\"}}C{{endblock}}",
    );
    assert_eq!(render_file(&child), "[C]");
}

#[test]
fn unknown_page_blocks_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "layout.vlm", "[{{block \"t\"}}P{{endblock}}]");
    let child = write(
        &dir,
        "page.vlm",
        "{{extends \"layout.vlm\"}}{{block \"other\"}}X{{endblock}}",
    );
    assert_eq!(render_file(&child), "[P]");
}

#[test]
fn page_content_outside_blocks_does_not_render() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "layout.vlm", "[{{block \"t\"}}P{{endblock}}]");
    let child = write(
        &dir,
        "page.vlm",
        "{{extends \"layout.vlm\"}}stray{{block \"t\"}}C{{endblock}}stray",
    );
    assert_eq!(render_file(&child), "[C]");
}

#[test]
fn include_splices_content() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "part.vlm", "world");
    let page = write(&dir, "page.vlm", "hello {{include \"part.vlm\"}}!");
    assert_eq!(render_file(&page), "hello world!");
}

#[test]
fn include_sees_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "part.vlm", "{{:name}}");
    let page = write(&dir, "page.vlm", "[{{include \"part.vlm\"}}]");
    let mut t = Template::compile_file(&page).unwrap();
    t.set_data("name", "Ada");
    assert_eq!(t.render().unwrap(), "[Ada]");
}

#[test]
fn include_inside_layout_block_is_inlined() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "snippet.vlm", "S");
    write(
        &dir,
        "layout.vlm",
        "[{{block \"t\"}}{{include \"snippet.vlm\"}}{{endblock}}]",
    );
    let child = write(&dir, "page.vlm", "{{extends \"layout.vlm\"}}");
    assert_eq!(render_file(&child), "[S]");
}

#[test]
fn nested_includes_resolve_relative_to_their_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    write(&dir, "sub/inner.vlm", "deep");
    write(&dir, "sub/outer.vlm", "({{include \"inner.vlm\"}})");
    let page = write(&dir, "page.vlm", "{{include \"sub/outer.vlm\"}}");
    assert_eq!(render_file(&page), "(deep)");
}

#[test]
fn missing_include_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let page = write(&dir, "page.vlm", "{{include \"nope.vlm\"}}");
    let err = Template::compile_file(&page).unwrap_err();
    assert!(err.message.contains("nope.vlm"), "{}", err);
}

#[test]
fn duplicate_extends_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "layout.vlm", "L");
    let page = write(
        &dir,
        "page.vlm",
        "{{extends \"layout.vlm\"}}{{extends \"layout.vlm\"}}",
    );
    let err = Template::compile_file(&page).unwrap_err();
    assert!(err.message.contains("duplicate 'extends'"), "{}", err);
}

#[test]
fn extends_inside_a_parent_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "grand.vlm", "G");
    write(&dir, "layout.vlm", "{{extends \"grand.vlm\"}}");
    let page = write(&dir, "page.vlm", "{{extends \"layout.vlm\"}}");
    let err = Template::compile_file(&page).unwrap_err();
    assert!(
        err.message.contains("not allowed inside a parent"),
        "{}",
        err
    );
}

#[test]
fn duplicate_layout_block_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir,
        "layout.vlm",
        "{{block \"t\"}}a{{endblock}}{{block \"t\"}}b{{endblock}}",
    );
    let page = write(&dir, "page.vlm", "{{extends \"layout.vlm\"}}");
    let err = Template::compile_file(&page).unwrap_err();
    assert!(err.message.contains("duplicate block"), "{}", err);
}

#[test]
fn include_cycle_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.vlm");
    fs::write(&a, "{{include \"a.vlm\"}}").unwrap();
    let err = Template::compile_file(&a).unwrap_err();
    assert!(err.message.contains("nesting"), "{}", err);
}
