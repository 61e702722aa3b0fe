/*!
# Vigil DevKit - Outils de développement pour le hub

- Builders de payloads capteurs (topics + JSON) pour tests et simulateur
- Autorité registre factice (HTTP, en mémoire) avec pannes simulables
- Émission de jetons bearer de test
*/

pub mod mock_registry;
pub mod payloads;
pub mod token;

pub use mock_registry::MockRegistry;
pub use payloads::SensorPayloadBuilder;
pub use token::issue_token;
