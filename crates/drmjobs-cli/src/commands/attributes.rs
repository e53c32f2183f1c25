//! Attributes command implementation.

use console::style;

use drmjobs_core::{ScalarAttribute, VectorAttribute};

/// Execute the attributes command.
pub fn execute() {
    println!("{} Scalar attributes:", style("→").cyan().bold());
    for attribute in ScalarAttribute::ALL {
        println!("  {}", attribute.name());
    }
    println!();
    println!("{} Vector attributes:", style("→").cyan().bold());
    for attribute in VectorAttribute::ALL {
        println!("  {}", attribute.name());
    }
}
