//! End-to-end scenarios for the `ouro` binary (spec section 8,
//! "Concrete end-to-end scenarios" S1-S6), driven as subprocesses the way a
//! user would actually invoke the driver.

use std::io::Write;
use std::process::{Command, Output};

fn ouro_bin() -> &'static str {
    env!("CARGO_BIN_EXE_ouro")
}

fn write_source(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(text.as_bytes()).unwrap();
    path
}

fn run(path: &std::path::Path) -> Output {
    Command::new(ouro_bin())
        .arg(path)
        .output()
        .expect("failed to run ouro binary")
}

#[test]
fn s1_hello_in_high_register() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "s1.ouro",
        "@high\nprint \"Hello World from OUROBOROS Natural Language!\"",
    );
    let output = run(&path);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Hello World from OUROBOROS Natural Language!\n"
    );
}

#[test]
fn s2_natural_language_loop_and_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "s2.ouro",
        r#"
@high
iterate counter from 1 through 5 {
    print $"Iteration {counter}: Hello!";
}
let total = sum of all in [1, 2, 3, 4, 5];
print $"Sum of [1, 2, 3, 4, 5] = {total}";
"#,
    );
    let output = run(&path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for i in 1..=5 {
        assert!(
            stdout.contains(&format!("Iteration {i}: Hello!")),
            "missing iteration {i} line in: {stdout}"
        );
    }
    assert!(stdout.contains("Sum of [1, 2, 3, 4, 5] = 15"), "stdout: {stdout}");
}

#[test]
fn s3_low_register_bit_ops() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "s3.ouro",
        r#"
let flags = 0b10101010;
flags |= 1 << 3;
flags &= ~(1 << 5);
flags ^= 1 << 7;
return flags;
"#,
    );
    let output = run(&path);
    let code = output.status.code().expect("process exited via signal");
    let mut flags: i64 = 0b10101010;
    flags |= 1 << 3;
    flags &= !(1i64 << 5);
    flags ^= 1 << 7;
    assert_eq!(code as i64, flags & 0xFF);
}

#[test]
fn s4_module_top_level_runs_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    write_source(&dir, "counted.ouro", "print \"module ran\";");
    let main_path = write_source(
        &dir,
        "s4.ouro",
        "import \"counted\";\nimport \"counted\";\nreturn 0;",
    );
    let output = run(&main_path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("module ran").count(), 1, "stdout: {stdout}");
}

#[test]
fn s4_two_importers_read_the_same_exported_mutated_value() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        &dir,
        "counted.ouro",
        "export let counter = 0;\ncounter = counter + 1;\n",
    );
    write_source(
        &dir,
        "reader_a.ouro",
        "import \"counted\";\nprint counter;\n",
    );
    let main_path = write_source(
        &dir,
        "s4.ouro",
        "import \"counted\";\nimport \"reader_a\";\nprint counter;\nreturn 0;",
    );
    let output = run(&main_path);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches('1').count(), 2, "both importers should observe 1: {stdout}");
}

#[test]
fn s5_innermost_matching_handler_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "s5.ouro",
        r#"
fn level3() {
    throw "boom";
}
fn level2() {
    level3();
}
fn level1() {
    try {
        level2();
    } catch (e: string) {
        print $"inner caught {e}";
    }
}

try {
    level1();
} catch (e) {
    print "outer handler ran (should not happen)";
}
print "after";
"#,
    );
    let output = run(&path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("inner caught boom"), "stdout: {stdout}");
    assert!(!stdout.contains("outer handler ran"), "stdout: {stdout}");
    assert!(stdout.contains("after"), "stdout: {stdout}");
}

#[test]
fn s6_inline_asm_register_round_trips_through_intrinsic() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "s6.ouro",
        "@asm {\n    mov eax, 42\n}\nprint register(0);\n",
    );
    let output = run(&path);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");
}
