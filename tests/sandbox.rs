//! End-to-end behaviour of the sandbox: policy, limits, output and isolation.

use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use sandpit::{ExecutionResult, FailureKind, Limits, PolicySet, Sandbox};

fn sandbox() -> Sandbox {
    Sandbox::new(
        PolicySet::standard(),
        Limits::default().with_max_operations(1_000_000),
    )
}

fn run(source: &str) -> ExecutionResult {
    sandbox().execute(source)
}

fn output(source: &str) -> String {
    match run(source) {
        ExecutionResult::Success { text, .. } => text,
        failure => panic!("script failed: {:?}", failure),
    }
}

fn failure(result: ExecutionResult) -> (FailureKind, String, String) {
    match result {
        ExecutionResult::Failure {
            kind,
            message,
            output,
        } => (kind, message, output),
        success => panic!("expected a failure, got {:?}", success),
    }
}

// ============================================================================
// Basic execution
// ============================================================================

#[test]
fn test_print_one_plus_one() {
    assert_eq!(
        Sandbox::default().execute("print(1+1)"),
        ExecutionResult::success("2\n".to_string(), Vec::new(), false)
    );
}

#[test]
fn test_print_separators() {
    assert_eq!(output("print(1, 'a', None, sep='-', end='!')"), "1-a-None!");
}

#[test]
fn test_uncaught_exception_reports_kind_and_line() {
    let (kind, message, prior) = failure(run("print('before')\nx = 1 / 0\nprint('after')"));
    assert_eq!(kind, FailureKind::RuntimeError);
    assert_eq!(message, "ZeroDivisionError: division by zero (line 2)");
    assert_eq!(prior, "before\n");
}

#[test]
fn test_syntax_error() {
    let (kind, message, _) = failure(run("if True\n    print(1)"));
    assert_eq!(kind, FailureKind::RuntimeError);
    assert!(message.starts_with("SyntaxError"), "{}", message);
}

// ============================================================================
// Policy
// ============================================================================

#[test]
fn test_os_system_is_denied() {
    let (kind, message, prior) = failure(run("import os; os.system('ls')"));
    assert_eq!(kind, FailureKind::PolicyViolation);
    assert_eq!(message, "os.system is not permitted");
    assert_eq!(prior, "");
}

#[rstest]
#[case("import socket", "import of module 'socket' is not permitted")]
#[case("from subprocess import run", "subprocess.run is not permitted")]
#[case("eval('1 + 1')", "builtins.eval is not permitted")]
#[case("from os import system as s\ns('ls')", "os.system is not permitted")]
#[case("print(secret)", "name 'secret' is not permitted")]
#[case("x = (1).__class__", "attribute '__class__' is not permitted")]
#[case("getattr(print, '__globals__')", "attribute '__globals__' is not permitted")]
#[case("open('/etc/passwd')", "builtins.open is not permitted")]
fn test_guard_rejections(#[case] source: &str, #[case] expected: &str) {
    let (kind, message, prior) = failure(run(source));
    assert_eq!(kind, FailureKind::PolicyViolation);
    assert_eq!(message, expected);
    assert_eq!(prior, "");
}

#[test]
fn test_guard_runs_before_any_output() {
    let (kind, _, prior) = failure(run("print('side effect')\nimport os"));
    assert_eq!(kind, FailureKind::PolicyViolation);
    assert_eq!(prior, "");
}

#[test]
fn test_runtime_policy_abort_is_not_catchable() {
    let source = "\
name = '__cl' + 'ass__'
try:
    getattr(1, name)
except Exception:
    print('caught')
";
    let (kind, message, _) = failure(run(source));
    assert_eq!(kind, FailureKind::PolicyViolation);
    assert_eq!(message, "attribute '__class__' is not permitted");
}

#[test]
fn test_allowed_modules_import() {
    let source = "\
import math
from collections import Counter
import matplotlib.pyplot as plt
print(math.floor(2.7))
";
    assert_eq!(output(source), "2\n");
}

// ============================================================================
// Limits
// ============================================================================

#[test]
fn test_iteration_limit_with_large_operation_budget() {
    let (kind, message, _) = failure(run("x=0\nwhile True:\n    x+=1"));
    assert_eq!(kind, FailureKind::IterationLimitExceeded);
    assert!(message.contains("loop iteration limit of 10000 exceeded"), "{}", message);
    assert!(message.contains("line 2"), "{}", message);
}

#[test]
fn test_default_ceilings_trip_operation_limit_first() {
    let (kind, _, _) = failure(Sandbox::default().execute("x=0\nwhile True:\n    x+=1"));
    assert_eq!(kind, FailureKind::OperationLimitExceeded);
}

#[test]
fn test_iteration_limit_keeps_prior_output() {
    let sandbox = Sandbox::new(
        PolicySet::standard(),
        Limits::default()
            .with_max_operations(1_000_000)
            .with_max_loop_iterations(100),
    );
    let (kind, _, prior) = failure(sandbox.execute("print('start')\nfor i in range(101):\n    pass"));
    assert_eq!(kind, FailureKind::IterationLimitExceeded);
    assert_eq!(prior, "start\n");
}

#[test]
fn test_loop_sites_are_counted_separately() {
    let sandbox = Sandbox::new(
        PolicySet::standard(),
        Limits::default()
            .with_max_operations(1_000_000)
            .with_max_loop_iterations(100),
    );
    let source = "\
total = 0
for i in range(100):
    total += 1
for j in range(100):
    total += 1
print(total)
";
    assert_eq!(sandbox.execute(source).text(), "200\n");
}

#[test]
fn test_operation_limit() {
    let sandbox = Sandbox::new(PolicySet::standard(), Limits::default().with_max_operations(50));
    let (kind, message, _) = failure(sandbox.execute("for i in range(100):\n    print(i)"));
    assert_eq!(kind, FailureKind::OperationLimitExceeded);
    assert_eq!(message, "operation limit of 50 exceeded");
}

#[test]
fn test_operation_limit_is_not_catchable() {
    let sandbox = Sandbox::new(PolicySet::standard(), Limits::default().with_max_operations(200));
    let source = "\
try:
    while True:
        pass
except Exception:
    print('caught')
";
    let (kind, _, prior) = failure(sandbox.execute(source));
    assert_eq!(kind, FailureKind::OperationLimitExceeded);
    assert_eq!(prior, "");
}

#[rstest]
#[case::call_free_comprehension("x = [i * 2 + 1 - i for i in range(9000)]\nprint(len(x))")]
#[case::arithmetic_in_one_statement("x = 1 + 2 + 3 + 4 + 5 + 6 + 7 + 8 + 9 + 10 + 11 + 12 + 13 + 14 + 15 + 16 + 17 + 18 + 19 + 20 + 21 + 22 + 23 + 24 + 25 + 26")]
#[case::condition_only_loop("i = 0\nwhile i < 9000 and i >= 0 and not i < 0:\n    i += 1")]
fn test_expressions_spend_operations(#[case] source: &str) {
    let sandbox = Sandbox::new(PolicySet::standard(), Limits::default().with_max_operations(50));
    let (kind, message, _) = failure(sandbox.execute(source));
    assert_eq!(kind, FailureKind::OperationLimitExceeded);
    assert_eq!(message, "operation limit of 50 exceeded");
}

#[rstest]
#[case::negations(format!("x = {}1", "-".repeat(300_000)))]
#[case::inversions(format!("x = {}1", "~".repeat(300_000)))]
#[case::logical_nots(format!("x = {}True", "not ".repeat(100_000)))]
#[case::long_sum(format!("x = {}", vec!["1"; 100_000].join(" + ")))]
#[case::attribute_chain(format!("x = math{}", ".pi".repeat(100_000)))]
#[case::nested_lambdas(format!("f = {}0", "lambda: ".repeat(100_000)))]
fn test_unbracketed_nesting_fails_closed(#[case] source: String) {
    let (kind, message, prior) = failure(run(&source));
    assert_eq!(kind, FailureKind::PolicyViolation);
    assert_eq!(message, "nesting depth exceeds maximum of 100");
    assert_eq!(prior, "");
}

#[test]
fn test_moderate_operator_nesting_still_runs() {
    assert_eq!(output(&format!("print({}1)", "-".repeat(41))), "-1\n");
    assert_eq!(output(&format!("print({})", vec!["1"; 60].join(" + "))), "60\n");
}

#[rstest]
#[case("print(len([] * 10**18))", "0\n")]
#[case("print(() * 10**18)", "()\n")]
#[case("print(10**18 * [])", "[]\n")]
#[case("print(repr('' * 10**18))", "''\n")]
#[case("print([1, 2] * 0, [3] * -5)", "[] []\n")]
fn test_empty_repetition_is_immediate(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(output(source), expected);
}

#[test]
fn test_recursion_depth() {
    let source = "\
def down(n):
    return down(n + 1)
down(0)
";
    let (kind, message, _) = failure(run(source));
    assert_eq!(kind, FailureKind::RuntimeError);
    assert!(message.starts_with("RecursionError"), "{}", message);
}

#[test]
fn test_sequence_limit() {
    let (kind, message, _) = failure(run("x = 'a' * 2000000"));
    assert_eq!(kind, FailureKind::RuntimeError);
    assert!(message.starts_with("MemoryError"), "{}", message);
}

#[test]
fn test_output_truncation() {
    let result = run("print('x' * 150000)");
    let ExecutionResult::Success {
        text, truncated, ..
    } = result
    else {
        panic!("expected success");
    };
    assert!(truncated);
    assert_eq!(
        text,
        format!("{}{}", "x".repeat(50_000), sandpit::output::TRUNCATION_MARKER)
    );
}

#[test]
fn test_execution_continues_after_truncation() {
    let sandbox = Sandbox::new(
        PolicySet::standard(),
        Limits::default()
            .with_max_output_length(10)
            .with_max_operations(1_000_000),
    );
    let result = sandbox.execute("for i in range(1000):\n    print(i)\nprint('done')");
    assert!(result.is_success());
    assert!(result.text().ends_with("...output truncated"));
}

#[test]
fn test_timeout() {
    let sandbox = Sandbox::new(
        PolicySet::standard(),
        Limits::default()
            .with_max_operations(u64::MAX)
            .with_max_loop_iterations(u64::MAX),
    )
    .with_timeout(Duration::from_millis(200));
    let (kind, message, _) = failure(sandbox.execute("while True:\n    pass"));
    assert_eq!(kind, FailureKind::OperationLimitExceeded);
    assert!(message.starts_with("execution timed out"), "{}", message);
}

// ============================================================================
// Determinism and isolation
// ============================================================================

#[test]
fn test_repeated_runs_are_identical() {
    let source = "\
import random
random.seed(7)
values = [random.randint(1, 100) for _ in range(5)]
print(values, sum(values))
";
    let sandbox = sandbox();
    let first = sandbox.execute(source);
    for _ in 0..3 {
        assert_eq!(sandbox.execute(source), first);
    }
}

#[test]
fn test_concurrent_executions_are_isolated() {
    let sandbox = sandbox();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sandbox = sandbox.clone();
            thread::spawn(move || {
                let source = format!("n = {}\nfor _ in range(500):\n    n += 1\nprint(n)", i);
                sandbox.execute(&source)
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        assert_eq!(result.text(), format!("{}\n", i + 500));
    }
}

#[test]
fn test_globals_do_not_leak_between_runs() {
    let sandbox = sandbox();
    assert!(sandbox.execute("leak = 1\nprint(leak)").is_success());
    let (kind, message, _) = failure(sandbox.execute("print(leak)"));
    assert_eq!(kind, FailureKind::PolicyViolation);
    assert_eq!(message, "name 'leak' is not permitted");
}

// ============================================================================
// Language surface
// ============================================================================

#[test]
fn test_functions_closures_and_comprehensions() {
    let source = "\
def make_counter(start=0):
    count = [start]
    def bump(step=1):
        count[0] += step
        return count[0]
    return bump

bump = make_counter(10)
bump()
bump(5)
print(bump())
squares = {n: n * n for n in range(5) if n % 2 == 0}
print(squares)
pairs = [(a, b) for a in range(3) for b in range(a)]
print(pairs)
print(sorted(['pear', 'fig', 'apple'], key=lambda s: len(s)))
";
    assert_eq!(
        output(source),
        "17\n{0: 0, 2: 4, 4: 16}\n[(1, 0), (2, 0), (2, 1)]\n['fig', 'pear', 'apple']\n"
    );
}

#[test]
fn test_strings_and_formatting() {
    let source = "\
name = 'world'
ratio = 2 / 3
print(f'hello {name.upper()}: {ratio:.3f}')
print('{}-{}'.format('a', 1), '%d%%' % 50)
print(', '.join(w.capitalize() for w in 'one two three'.split()))
print('  padded  '.strip().center(10, '*'))
";
    assert_eq!(
        output(source),
        "hello WORLD: 0.667\na-1 50%\nOne, Two, Three\n**padded**\n"
    );
}

#[test]
fn test_exceptions_and_control_flow() {
    let source = "\
def check(value):
    try:
        if value < 0:
            raise ValueError('negative')
        result = 10 // value
    except ZeroDivisionError:
        return 'zero'
    except ValueError as e:
        return 'bad: ' + str(e)
    else:
        return result
    finally:
        print('checked', value)

for v in [2, 0, -1]:
    print(check(v))

for i in range(5):
    if i == 3:
        break
else:
    print('not reached')
a, *rest = [1, 2, 3]
print(a, rest)
";
    assert_eq!(
        output(source),
        "checked 2\n5\nchecked 0\nzero\nchecked -1\nbad: negative\n1 [2, 3]\n"
    );
}

#[test]
fn test_integer_overflow_is_an_exception() {
    let source = "\
try:
    x = 2 ** 70
except OverflowError:
    print('overflow')
";
    assert_eq!(output(source), "overflow\n");
}

#[test]
fn test_content_blocks_for_text() {
    let blocks = run("print('hi')").to_content_blocks();
    let json = serde_json::to_value(&blocks).unwrap();
    assert_eq!(json, serde_json::json!([{"type": "text", "text": "hi\n"}]));
}
