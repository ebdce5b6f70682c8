use crate::conversation::TurnId;
use crate::conversation::TurnResponse;

/// Offline responder. Never touches the network and always answers.
pub fn answer(query: &str) -> String {
    format!(
        "[Local knowledge] Hello, this answer comes from the local knowledge base.\n\n\
         Your question was: \"{}\"\n\n\
         The local knowledge base returns stored reference material rather than a generated reply.\n\n\
         To use the online AI service, switch modes with the button in the panel header.",
        query
    )
}

/// Async wrapper so local and remote turns are driven the same way.
pub async fn respond(turn: TurnId, query: String) -> TurnResponse {
    TurnResponse {
        turn,
        recovered: false,
        result: Ok(answer(&query)),
    }
}
