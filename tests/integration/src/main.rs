//! Runs each integration suite of the activation broker in turn and prints
//! a pass/fail table. `cargo run -p integration-tests`; a single suite runs
//! with `cargo test -p integration-tests --test <suite>`.

use std::process::Command;
use std::time::{Duration, Instant};

/// One `[[test]]` target of this crate
#[derive(Debug, Clone)]
struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Apartment Tests",
        description: "STA and MTA identity, nesting, message pumping",
        test_name: "apartment_tests",
    },
    TestCategory {
        name: "Activation Tests",
        description: "Class object resolution order, local server launch and polling",
        test_name: "activation_tests",
    },
    TestCategory {
        name: "Lifecycle Tests",
        description: "Process lock count, teardown, external locks, library reaping",
        test_name: "lifecycle_tests",
    },
    TestCategory {
        name: "Stress Tests",
        description: "Registration races, lock contention, initialize storms",
        test_name: "stress_tests",
    },
];

fn print_banner() {
    println!("{}", "=".repeat(80));
    println!("          combase - Activation Broker Integration Test Suite");
    println!("{}", "=".repeat(80));
    println!();
}

fn print_test_categories() {
    println!("Test Categories:");
    println!("{}", "-".repeat(80));
    for (i, cat) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, cat.name, cat.description);
    }
    println!("{}", "-".repeat(80));
    println!();
}

fn run_test_category(category: &TestCategory) -> (bool, Duration, String) {
    println!("\n{}", "=".repeat(80));
    println!("Running: {}", category.name);
    println!("{}", "=".repeat(80));

    let start = Instant::now();

    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();

    let duration = start.elapsed();

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            if !stdout.is_empty() {
                println!("{}", stdout);
            }
            if !stderr.is_empty() {
                eprintln!("{}", stderr);
            }

            let success = output.status.success();
            let summary = if success {
                "PASSED".to_string()
            } else {
                format!("FAILED (exit code: {:?})", output.status.code())
            };

            (success, duration, summary)
        }
        Err(e) => {
            (false, duration, format!("Failed to execute: {}", e))
        }
    }
}

fn main() {
    print_banner();
    print_test_categories();

    let total_start = Instant::now();
    let mut results = Vec::new();

    for category in TEST_CATEGORIES {
        let (success, duration, summary) = run_test_category(category);
        results.push((category.name, success, duration, summary));
    }

    let total_duration = total_start.elapsed();

    println!("\n{}", "=".repeat(80));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(80));

    let passed = results.iter().filter(|(_, s, _, _)| *s).count();
    let failed = results.iter().filter(|(_, s, _, _)| !*s).count();

    println!("\nCategories: {} | Passed: {} | Failed: {}", results.len(), passed, failed);
    println!("Total Duration: {:?}", total_duration);
    println!();

    println!("{:<30} {:<10} {:<15} {}", "Category", "Status", "Duration", "Details");
    println!("{}", "-".repeat(80));

    for (name, success, duration, summary) in &results {
        let status = if *success { "PASS" } else { "FAIL" };
        println!("{:<30} {:<10} {:<15?} {}", name, status, duration, summary);
    }

    println!("{}", "=".repeat(80));

    if failed > 0 {
        println!("\nSome tests failed!");
        std::process::exit(1);
    } else {
        println!("\nAll tests passed!");
        std::process::exit(0);
    }
}
