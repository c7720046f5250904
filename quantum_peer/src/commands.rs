//! Line commands read from stdin, standing in for the device layer.

use quantum_core::{InputEvent, ObjectId, Position};

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Input(InputEvent),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  tilt <beta> <gamma>     create from device orientation (Dreamer)
  create <x> <y> <z>      create at a scene position (Dreamer)
  tap <object_id>         collapse an object (Collapser)
  switch                  flip between Dreamer and Collapser
  fulfil                  declare the current prophecy fulfilled
  volcano <x> <y> <z>     summon a volcano
  help                    show this list
  quit                    leave the session";

fn number(token: Option<&str>, name: &str) -> Result<f64, String> {
    let token = token.ok_or_else(|| format!("missing {}", name))?;
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{} is not a number: {}", name, token))
}

fn position<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<Position, String> {
    let x = number(tokens.next(), "x")?;
    let y = number(tokens.next(), "y")?;
    let z = number(tokens.next(), "z")?;
    Ok(Position::new(x, y, z))
}

/// Parses a command line. Blank lines parse to `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(None);
    };

    let command = match head.to_lowercase().as_str() {
        "tilt" => {
            let beta = number(tokens.next(), "beta")?;
            let gamma = number(tokens.next(), "gamma")?;
            Command::Input(InputEvent::TiltReading { beta, gamma })
        }
        "create" => Command::Input(InputEvent::TiltCreateRequested(position(&mut tokens)?)),
        "tap" => {
            let id = tokens.next().ok_or("missing object id")?;
            Command::Input(InputEvent::TapInteractionRequested(ObjectId::from(id)))
        }
        "switch" => Command::Input(InputEvent::RoleSwitchRequested),
        "fulfil" | "fulfill" => Command::Input(InputEvent::ProphecyFulfilled),
        "volcano" => Command::Input(InputEvent::VolcanoRequested(position(&mut tokens)?)),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };

    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected argument: {}", extra));
    }
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inputs() {
        assert_eq!(
            parse_command("tilt 10 -5").unwrap(),
            Some(Command::Input(InputEvent::TiltReading { beta: 10.0, gamma: -5.0 }))
        );
        assert_eq!(
            parse_command("  CREATE 1 2 -2 ").unwrap(),
            Some(Command::Input(InputEvent::TiltCreateRequested(Position::new(1.0, 2.0, -2.0))))
        );
        assert_eq!(
            parse_command("tap obj_player_1_42").unwrap(),
            Some(Command::Input(InputEvent::TapInteractionRequested(ObjectId::from("obj_player_1_42"))))
        );
        assert_eq!(
            parse_command("switch").unwrap(),
            Some(Command::Input(InputEvent::RoleSwitchRequested))
        );
        assert_eq!(
            parse_command("fulfill").unwrap(),
            Some(Command::Input(InputEvent::ProphecyFulfilled))
        );
        assert_eq!(
            parse_command("volcano 0 0 -5").unwrap(),
            Some(Command::Input(InputEvent::VolcanoRequested(Position::new(0.0, 0.0, -5.0))))
        );
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("?").unwrap(), Some(Command::Help));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("dance").unwrap_err().contains("unknown command"));
        assert!(parse_command("tilt 10").unwrap_err().contains("missing gamma"));
        assert!(parse_command("create 1 two 3").unwrap_err().contains("not a number"));
        assert!(parse_command("tilt NaN 0").is_err());
        assert!(parse_command("tap").unwrap_err().contains("missing object id"));
        assert!(parse_command("switch now").unwrap_err().contains("unexpected argument"));
    }
}
