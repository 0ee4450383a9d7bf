use crate::customer::Customer;

/// Substitute `{{name}}` and `{{email}}` in a message template.
///
/// Other placeholders are left untouched.
pub fn render_message(template: &str, customer: &Customer) -> String {
    template
        .replace("{{name}}", &customer.name)
        .replace("{{email}}", &customer.email)
}
