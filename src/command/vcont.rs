//! `vCont` action-list parsing.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::char,
    combinator::{map, opt, value},
    multi::separated_list1,
    sequence::preceded,
    IResult,
};

use super::util::hex_u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VContAction {
    Continue,
    ContinueSignal(u32),
    Step,
    StepSignal(u32),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VContCommand {
    pub actions: Vec<(VContAction, Option<u32>)>,
}

fn action(input: &[u8]) -> IResult<&[u8], VContAction> {
    alt((
        map(preceded(char('C'), hex_u32), VContAction::ContinueSignal),
        value(VContAction::Continue, char('c')),
        map(preceded(char('S'), hex_u32), VContAction::StepSignal),
        value(VContAction::Step, char('s')),
        value(VContAction::Stop, char('t')),
    ))(input)
}

fn action_with_thread(input: &[u8]) -> IResult<&[u8], (VContAction, Option<u32>)> {
    let (input, action) = action(input)?;
    let (input, thread) = opt(preceded(char(':'), hex_u32))(input)?;
    Ok((input, (action, thread)))
}

pub fn v_cont(input: &[u8]) -> IResult<&[u8], VContCommand> {
    let (input, actions) = separated_list1(tag(b";"), action_with_thread)(input)?;
    Ok((input, VContCommand { actions }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_continue() {
        let (_, cmd) = v_cont(b"c").unwrap();
        assert_eq!(cmd.actions, vec![(VContAction::Continue, None)]);
    }

    #[test]
    fn parses_step_with_thread() {
        let (_, cmd) = v_cont(b"s:1").unwrap();
        assert_eq!(cmd.actions, vec![(VContAction::Step, Some(1))]);
    }

    #[test]
    fn parses_multiple_actions() {
        let (_, cmd) = v_cont(b"s:1;c").unwrap();
        assert_eq!(
            cmd.actions,
            vec![(VContAction::Step, Some(1)), (VContAction::Continue, None)]
        );
    }
}
