use client_core::{LiveForm, PersistenceController};
use shared::domain::FieldValue;

/// One line typed during a `fill` session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Set { field: String, value: FieldValue },
    Save,
    Show,
    Submit,
    Quit,
    Help,
    Unknown(String),
}

pub const HELP: &str = "\
  <field>=<value>  set a field (empty value clears it)
  :save            write the form to disk now
  :show            print the current form
  :submit          finish the form and discard the saved draft
  :quit            save and exit
  :help            show this help";

pub fn parse_line(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let command = match line {
        ":save" => SessionCommand::Save,
        ":show" => SessionCommand::Show,
        ":submit" => SessionCommand::Submit,
        ":quit" | ":q" => SessionCommand::Quit,
        ":help" | "?" => SessionCommand::Help,
        _ => match line.split_once('=') {
            Some((field, value)) if !field.trim().is_empty() => {
                let value = value.trim();
                SessionCommand::Set {
                    field: field.trim().to_string(),
                    value: if value.is_empty() {
                        FieldValue::Empty
                    } else {
                        FieldValue::from(value)
                    },
                }
            }
            _ => SessionCommand::Unknown(line.to_string()),
        },
    };
    Some(command)
}

/// Empties a submitted form and deletes its saved draft. The reset comes
/// first so the controller treats it as already discarded.
pub fn complete_submission(form: &LiveForm, controller: &PersistenceController) {
    form.reset();
    controller.clear_saved();
}
