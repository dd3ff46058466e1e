//! Native modules seen from scripts.

use pretty_assertions::assert_eq;
use rstest::rstest;
use sandpit::{ExecutionResult, FailureKind, Limits, PolicySet, Sandbox};

fn run(source: &str) -> ExecutionResult {
    Sandbox::new(
        PolicySet::standard(),
        Limits::default().with_max_operations(1_000_000),
    )
    .execute(source)
}

fn output(source: &str) -> String {
    match run(source) {
        ExecutionResult::Success { text, .. } => text,
        failure => panic!("script failed: {:?}", failure),
    }
}

#[rstest]
#[case("import math\nprint(math.sqrt(16), math.factorial(5), math.gcd(12, 18))", "4.0 120 6\n")]
#[case("import math\nprint(round(math.pi, 3), math.floor(-2.5), math.ceil(2.1))", "3.142 -3 3\n")]
#[case("from math import *\nprint(isqrt(17), comb(5, 2))", "4 10\n")]
#[case("import statistics\nprint(statistics.mean([1, 2, 3, 4]), statistics.median([3, 1, 2]))", "2.5 2\n")]
#[case("import statistics\nprint(statistics.pstdev([2, 4, 4, 4, 5, 5, 7, 9]))", "2.0\n")]
fn test_numeric_modules(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(output(source), expected);
}

#[rstest]
#[case("math.lcm(x, 1)")]
#[case("math.lcm(3, x)")]
#[case("math.gcd(x, 0)")]
fn test_integer_extremes_raise_overflow(#[case] call: &str) {
    let source = format!(
        "import math\nx = -9223372036854775807 - 1\ntry:\n    {}\nexcept OverflowError:\n    print('overflow')\n",
        call
    );
    assert_eq!(output(&source), "overflow\n");
}

#[test]
fn test_extreme_search_bounds_are_clamped() {
    let source = "\
x = -9223372036854775807 - 1
print('abcabc'.find('c', x), 'abcabc'.count('a', x, 9223372036854775807))
";
    assert_eq!(output(source), "2 2\n");
}

#[test]
fn test_statistics_error_is_catchable() {
    let source = "\
import statistics
try:
    statistics.mean([])
except ValueError:
    print('empty')
";
    assert_eq!(output(source), "empty\n");
}

#[test]
fn test_re_functions() {
    let source = r#"
import re
print(re.findall(r'\d+', 'a1b22'))
print(re.sub('a', 'b', 'banana'))
m = re.search(r'(\d+)-(\d+)', 'x 10-20')
print(m.group(1), m.group(2), m.span())
print(re.match(r'\d', 'x1'))
pattern = re.compile(r'(?P<key>\w+)=(?P<value>\w+)')
print(pattern.search('a=1').groupdict())
print(re.split(r'\s*,\s*', 'a , b,c'))
"#;
    assert_eq!(
        output(source),
        "['1', '22']\nbbnbnb\n10 20 (2, 7)\nNone\n{'key': 'a', 'value': '1'}\n['a', 'b', 'c']\n"
    );
}

#[test]
fn test_invalid_regex_is_value_error() {
    let result = run("import re\nre.compile('(')");
    assert_eq!(result.failure_kind(), Some(FailureKind::RuntimeError));
    let ExecutionResult::Failure { message, .. } = result else {
        panic!("expected failure");
    };
    assert!(message.starts_with("ValueError: invalid regular expression"), "{}", message);
}

#[test]
fn test_datetime() {
    let source = "\
from datetime import datetime, date
d = datetime(2024, 3, 9, 14, 5, 7)
print(d)
print(d.strftime('%Y/%m/%d %H:%M'), d.weekday())
print(d.isoformat())
print(date(2024, 1, 31) < date(2024, 2, 1))
";
    assert_eq!(
        output(source),
        "2024-03-09 14:05:07\n2024/03/09 14:05 5\n2024-03-09T14:05:07\nTrue\n"
    );
}

#[test]
fn test_itertools() {
    let source = "\
from itertools import permutations, combinations, accumulate, product
print(list(permutations([1, 2, 3], 2)))
print(list(combinations('abc', 2)))
print(list(accumulate([1, 2, 3])))
print(len(list(product(range(3), repeat=2))))
";
    assert_eq!(
        output(source),
        "[(1, 2), (1, 3), (2, 1), (2, 3), (3, 1), (3, 2)]\n\
         [('a', 'b'), ('a', 'c'), ('b', 'c')]\n\
         [1, 3, 6]\n\
         9\n"
    );
}

#[test]
fn test_collections_counter() {
    let source = "\
from collections import Counter
c = Counter('mississippi')
print(c.most_common(2))
print(c['s'], c['z'])
";
    assert_eq!(output(source), "[('i', 4), ('s', 4)]\n4 0\n");
}

#[test]
fn test_random_is_seedable() {
    let source = "\
import random
random.seed(42)
first = [random.random() for _ in range(3)]
random.seed(42)
second = [random.random() for _ in range(3)]
print(first == second, all(0 <= x < 1 for x in first))
";
    assert_eq!(output(source), "True True\n");
}

#[test]
fn test_time_module() {
    let source = "\
import time
start = time.perf_counter()
time.sleep(0.01)
print(time.perf_counter() >= start, time.time() > 1600000000)
";
    assert_eq!(output(source), "True True\n");
}

#[test]
fn test_unknown_module_member() {
    let result = run("import math\nmath.nothing(1)");
    assert_eq!(result.failure_kind(), Some(FailureKind::RuntimeError));
}
